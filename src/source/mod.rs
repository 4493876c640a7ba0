//! Raster source capability: opening a dataset by URL and reading
//! metadata, statistics and fixed-size pixel tiles from it.
//!
//! The service is written against the [`RasterSource`] / [`SourceReader`]
//! traits; [`GeoTiffSource`] is the built-in implementation. Alternative
//! backends (object stores, other formats) plug in at this seam.

pub mod geotiff;

pub use geotiff::GeoTiffSource;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::tile::TileCoord;

/// Mapping from a sample value to an RGBA display color.
pub type ColorMap = BTreeMap<u8, [u8; 4]>;

/// Square window of pixel data extracted for one tile request.
///
/// Band-major layout: `bands[b]` holds `width * height` samples in
/// row-major order. `mask` marks which cells carry valid data.
#[derive(Debug, Clone)]
pub struct PixelTile {
    pub width: u32,
    pub height: u32,
    pub band_names: Vec<String>,
    pub bands: Vec<Vec<f64>>,
    pub mask: Vec<bool>,
    pub colormap: Option<ColorMap>,
}

impl PixelTile {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }
}

/// Dataset-level metadata reported by a reader without touching pixels.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    /// Geographic bounds `[west, south, east, north]` in degrees.
    pub bounds: [f64; 4],
    pub minzoom: u8,
    pub maxzoom: u8,
    /// Center of the bounds, `(lon, lat)`.
    pub center: (f64, f64),
    pub band_names: Vec<String>,
    pub dtype: String,
    pub nodata_value: Option<f64>,
}

/// Per-band summary statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub count: u64,
    pub sum: f64,
    pub valid_percent: f64,
    pub percentile_2: f64,
    pub percentile_98: f64,
}

/// Options for a single tile read.
#[derive(Debug, Clone, Copy)]
pub struct TileReadOptions {
    /// Edge length of the output window in pixels.
    pub tile_size: u32,
    /// 1-based band restriction; `None` selects every band.
    pub band_index: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("failed to fetch source: {0}")]
    Fetch(String),

    #[error("unsupported or corrupt raster: {0}")]
    Format(String),

    #[error("band index {0} is out of range")]
    BandIndex(usize),

    #[error("statistics computation timed out")]
    Timeout,

    #[error("i/o error reading source: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory opening raster datasets by URL.
///
/// One open/close cycle per request; implementations must not share
/// reader state across requests.
pub trait RasterSource: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn SourceReader>, SourceError>;
}

/// An opened raster dataset. Dropped at the end of the request that
/// opened it, releasing whatever the implementation holds.
pub trait SourceReader: Send {
    /// Dataset metadata; must not require a pixel read.
    fn info(&self) -> Result<DatasetInfo, SourceError>;

    /// Per-band statistics keyed `b1`, `b2`, ...
    fn statistics(&mut self) -> Result<BTreeMap<String, BandStatistics>, SourceError>;

    /// Extract a square pixel window for `coord`. Tiles that do not
    /// intersect the dataset yield an all-masked window, not an error.
    fn tile(&mut self, coord: TileCoord, options: &TileReadOptions)
        -> Result<PixelTile, SourceError>;
}
