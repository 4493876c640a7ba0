//! Shapes strategy: cells are grouped by their (uint8-cast) sample value
//! and merged into rectangular blocks, one multi-polygon feature per
//! distinct value. With a color map present each feature also carries the
//! resolved display color, which is what makes categorical rasters render
//! compactly.

use std::collections::BTreeMap;

use crate::source::PixelTile;

use super::mvt::{GeomWriter, LayerBuilder, PropValue, DEFAULT_EXTENT};
use super::EncodeError;

/// Block of same-valued cells; rows and columns are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellRect {
    row0: usize,
    row1: usize,
    col0: usize,
    col1: usize,
}

pub fn encode(tile: &PixelTile, layer_name: &str) -> Result<Vec<u8>, EncodeError> {
    super::validate(tile)?;
    if tile.band_count() != 1 {
        return Err(EncodeError::BandCount(tile.band_count()));
    }

    let band = &tile.bands[0];
    let width = tile.width as usize;
    let height = tile.height as usize;

    // Horizontal runs of equal value, keyed by value for deterministic
    // feature order
    let mut runs: BTreeMap<u8, Vec<(usize, usize, usize)>> = BTreeMap::new();
    for row in 0..height {
        let mut col = 0;
        while col < width {
            let cell = row * width + col;
            if !tile.mask[cell] {
                col += 1;
                continue;
            }
            let value = band[cell] as u8;
            let mut end = col;
            while end + 1 < width {
                let next = row * width + end + 1;
                if tile.mask[next] && band[next] as u8 == value {
                    end += 1;
                } else {
                    break;
                }
            }
            runs.entry(value).or_default().push((row, col, end));
            col = end + 1;
        }
    }

    let extent = DEFAULT_EXTENT as u64;
    let mut layer = LayerBuilder::new(layer_name);
    let value_key = layer.key("value");
    let color_key = tile.colormap.as_ref().map(|_| layer.key("color"));

    let mut id = 0u64;
    for (value, value_runs) in &runs {
        let mut geom = GeomWriter::new();
        for rect in merge_runs(value_runs) {
            let x0 = (rect.col0 as u64 * extent / width as u64) as i64;
            let x1 = ((rect.col1 as u64 + 1) * extent / width as u64) as i64;
            let y0 = (rect.row0 as u64 * extent / height as u64) as i64;
            let y1 = ((rect.row1 as u64 + 1) * extent / height as u64) as i64;
            geom.rect(x0, y0, x1, y1);
        }

        let mut tags = vec![value_key, layer.value(PropValue::Uint(u64::from(*value)))];
        if let (Some(color_key), Some(colormap)) = (color_key, &tile.colormap) {
            if let Some(rgba) = colormap.get(value) {
                tags.push(color_key);
                tags.push(layer.value(PropValue::Str(hex_color(*rgba))));
            }
        }

        id += 1;
        layer.polygon(id, tags, geom.finish());
    }

    Ok(layer.encode())
}

/// Merge row-ordered runs into rectangles: a run extends the rectangle
/// above it when both cover the same column span in adjacent rows.
fn merge_runs(runs: &[(usize, usize, usize)]) -> Vec<CellRect> {
    let mut rects: Vec<CellRect> = Vec::new();
    for &(row, col0, col1) in runs {
        let extended = rects
            .iter_mut()
            .rev()
            .find(|rect| rect.col0 == col0 && rect.col1 == col1 && rect.row1 + 1 == row);
        match extended {
            Some(rect) => rect.row1 = row,
            None => rects.push(CellRect {
                row0: row,
                row1: row,
                col0,
                col1,
            }),
        }
    }
    rects
}

fn hex_color([red, green, blue, _alpha]: [u8; 4]) -> String {
    format!("#{red:02x}{green:02x}{blue:02x}")
}
