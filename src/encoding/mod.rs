//! Vector-tile encoding: turns a [`PixelTile`] into Mapbox Vector Tile
//! bytes with one of two strategies, selected per request by the route.

pub mod mvt;
mod pixels;
mod shapes;
pub mod vector_tile;

use crate::source::PixelTile;

/// Layer name written into every encoded tile.
pub const LAYER_NAME: &str = "cogeo";

/// The two encoding strategies, mutually exclusive per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEncoding {
    /// One polygon per valid sample cell, all bands as properties.
    Pixels,
    /// Same-valued cells merged into polygons; single band, color-mapped.
    Shapes,
}

impl TileEncoding {
    /// Path segment of the tile route serving this strategy.
    pub fn route_name(self) -> &'static str {
        match self {
            TileEncoding::Pixels => "pixels",
            TileEncoding::Shapes => "shapes",
        }
    }

    /// Shapes operates on exactly one band, so its route demands `bidx`.
    pub fn requires_band_index(self) -> bool {
        matches!(self, TileEncoding::Shapes)
    }

    pub fn encode(self, tile: &PixelTile, layer_name: &str) -> Result<Vec<u8>, EncodeError> {
        match self {
            TileEncoding::Pixels => pixels::encode(tile, layer_name),
            TileEncoding::Shapes => shapes::encode(tile, layer_name),
        }
    }
}

impl std::str::FromStr for TileEncoding {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pixels" => Ok(TileEncoding::Pixels),
            "shapes" => Ok(TileEncoding::Shapes),
            _ => Err(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("tile dimensions are zero")]
    ZeroDimensions,

    #[error("data/mask shape mismatch: expected {expected} cells, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("shapes encoding expects exactly one band, got {0}")]
    BandCount(usize),
}

/// Reject pixel grids whose mask or bands disagree with the declared size.
fn validate(tile: &PixelTile) -> Result<(), EncodeError> {
    let cells = tile.width as usize * tile.height as usize;
    if cells == 0 {
        return Err(EncodeError::ZeroDimensions);
    }
    if tile.mask.len() != cells {
        return Err(EncodeError::DimensionMismatch {
            expected: cells,
            actual: tile.mask.len(),
        });
    }
    for band in &tile.bands {
        if band.len() != cells {
            return Err(EncodeError::DimensionMismatch {
                expected: cells,
                actual: band.len(),
            });
        }
    }
    Ok(())
}
