use crate::tile::TileCoord;
use std::f64::consts::PI;

/// WGS84 semi-major axis in meters.
pub const EARTH_RADIUS: f64 = 6378137.0;
/// Half the Web-Mercator world span in meters.
pub const MERCATOR_HALF_SPAN: f64 = PI * EARTH_RADIUS;
/// Full Web-Mercator world span in meters.
pub const MERCATOR_WORLD_SPAN: f64 = 2.0 * MERCATOR_HALF_SPAN;
/// Meters per degree of longitude at the equator.
pub const METERS_PER_DEGREE: f64 = MERCATOR_WORLD_SPAN / 360.0;

const MAX_LAT: f64 = 85.0511287798;
const MAX_ZOOM: u8 = 24;

/// Web-Mercator bounding box in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorBounds {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Get the Web-Mercator bounds covered by a tile
pub fn tile_mercator_bounds(tile: &TileCoord) -> MercatorBounds {
    let span = MERCATOR_WORLD_SPAN / 2.0_f64.powi(tile.z as i32);
    let xmin = -MERCATOR_HALF_SPAN + tile.x as f64 * span;
    let ymax = MERCATOR_HALF_SPAN - tile.y as f64 * span;

    MercatorBounds {
        xmin,
        ymin: ymax - span,
        xmax: xmin + span,
        ymax,
    }
}

/// Convert Web-Mercator meters to lon/lat degrees
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x / MERCATOR_HALF_SPAN * 180.0;
    let lat = (y / EARTH_RADIUS).sinh().atan() * 180.0 / PI;
    (lon, lat)
}

/// Convert lon/lat degrees to Web-Mercator meters
///
/// Latitude is clamped to the projection's valid range.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat_clamped = lat.clamp(-MAX_LAT, MAX_LAT);
    let x = lon / 180.0 * MERCATOR_HALF_SPAN;
    let y = (PI / 4.0 + lat_clamped.to_radians() / 2.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

/// Ground resolution of one output pixel for a tile at zoom `z`, in meters
pub fn resolution(z: u32, tile_size: u32) -> f64 {
    MERCATOR_WORLD_SPAN / (2.0_f64.powi(z as i32) * tile_size as f64)
}

/// Smallest zoom whose native resolution (256px base tiles) is at least as
/// fine as `res` meters per pixel
pub fn zoom_for_resolution(res: f64) -> u8 {
    if res <= 0.0 {
        return MAX_ZOOM;
    }
    let base = MERCATOR_WORLD_SPAN / 256.0;
    (base / res).log2().ceil().clamp(0.0, MAX_ZOOM as f64) as u8
}

/// Deepest zoom at which an extent of `size` meters still fits in one tile
pub fn zoom_for_extent(size: f64) -> u8 {
    if size <= 0.0 {
        return 0;
    }
    (MERCATOR_WORLD_SPAN / size)
        .log2()
        .floor()
        .clamp(0.0, MAX_ZOOM as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_tile_bounds() {
        let bounds = tile_mercator_bounds(&TileCoord::new(0, 0, 0));
        assert!((bounds.xmin + MERCATOR_HALF_SPAN).abs() < 1e-6);
        assert!((bounds.xmax - MERCATOR_HALF_SPAN).abs() < 1e-6);
        assert!((bounds.ymin + MERCATOR_HALF_SPAN).abs() < 1e-6);
        assert!((bounds.ymax - MERCATOR_HALF_SPAN).abs() < 1e-6);
    }

    #[test]
    fn test_tile_bounds_quadrant() {
        // Tile 1/1/0 covers the north-eastern quadrant
        let bounds = tile_mercator_bounds(&TileCoord::new(1, 1, 0));
        assert!(bounds.xmin.abs() < 1e-6);
        assert!(bounds.ymin.abs() < 1e-6);
        assert!((bounds.xmax - MERCATOR_HALF_SPAN).abs() < 1e-6);
        assert!((bounds.ymax - MERCATOR_HALF_SPAN).abs() < 1e-6);
    }

    #[test]
    fn test_mercator_lonlat_roundtrip() {
        let (x, y) = lonlat_to_mercator(12.5, 47.25);
        let (lon, lat) = mercator_to_lonlat(x, y);
        assert!((lon - 12.5).abs() < 1e-9);
        assert!((lat - 47.25).abs() < 1e-9);
    }

    #[test]
    fn test_mercator_origin() {
        let (lon, lat) = mercator_to_lonlat(0.0, 0.0);
        assert!(lon.abs() < 1e-12);
        assert!(lat.abs() < 1e-12);
    }

    #[test]
    fn test_zoom_for_resolution() {
        // Zoom 0 resolution for 256px tiles is ~156543 m/px
        assert_eq!(zoom_for_resolution(160000.0), 0);
        // A 10m/px dataset needs zoom 14 (~9.55 m/px)
        assert_eq!(zoom_for_resolution(10.0), 14);
    }

    #[test]
    fn test_zoom_for_extent() {
        // The whole world fits at zoom 0
        assert_eq!(zoom_for_extent(MERCATOR_WORLD_SPAN), 0);
        // A quarter of the world span fits at zoom 2
        assert_eq!(zoom_for_extent(MERCATOR_WORLD_SPAN / 4.0), 2);
    }
}
