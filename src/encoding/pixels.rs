//! Pixel-grid strategy: one square polygon per valid sample cell, tagged
//! with the numeric value of every selected band. Value-independent, so it
//! suits dense, non-categorical rasters.

use crate::source::PixelTile;

use super::mvt::{GeomWriter, LayerBuilder, PropValue, DEFAULT_EXTENT};
use super::EncodeError;

pub fn encode(tile: &PixelTile, layer_name: &str) -> Result<Vec<u8>, EncodeError> {
    super::validate(tile)?;

    let width = tile.width as usize;
    let height = tile.height as usize;
    let extent = DEFAULT_EXTENT as u64;

    let mut layer = LayerBuilder::new(layer_name);
    let band_keys: Vec<u32> = tile.band_names.iter().map(|name| layer.key(name)).collect();

    let mut id = 0u64;
    for row in 0..height {
        for col in 0..width {
            let cell = row * width + col;
            if !tile.mask[cell] {
                continue;
            }

            let mut tags = Vec::with_capacity(band_keys.len() * 2);
            for (band, &key) in tile.bands.iter().zip(&band_keys) {
                tags.push(key);
                tags.push(layer.value(PropValue::Double(band[cell])));
            }

            let x0 = (col as u64 * extent / width as u64) as i64;
            let x1 = ((col as u64 + 1) * extent / width as u64) as i64;
            let y0 = (row as u64 * extent / height as u64) as i64;
            let y1 = ((row as u64 + 1) * extent / height as u64) as i64;
            let mut geom = GeomWriter::new();
            geom.rect(x0, y0, x1, y1);

            id += 1;
            layer.polygon(id, tags, geom.finish());
        }
    }

    Ok(layer.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::vector_tile::Tile;
    use prost::Message;

    fn two_band_tile() -> PixelTile {
        PixelTile {
            width: 2,
            height: 2,
            band_names: vec!["b1".to_string(), "b2".to_string()],
            bands: vec![vec![1.0, 2.0, 3.0, 4.0], vec![10.0, 20.0, 30.0, 40.0]],
            mask: vec![true, true, false, true],
            colormap: None,
        }
    }

    #[test]
    fn test_one_feature_per_valid_cell() {
        let bytes = encode(&two_band_tile(), "cogeo").unwrap();
        let decoded = Tile::decode(bytes.as_slice()).unwrap();
        let layer = &decoded.layers[0];
        assert_eq!(layer.name, "cogeo");
        assert_eq!(layer.features.len(), 3);
        assert_eq!(layer.keys, vec!["b1".to_string(), "b2".to_string()]);
        // Every feature carries one tag pair per band
        for feature in &layer.features {
            assert_eq!(feature.tags.len(), 4);
        }
    }

    #[test]
    fn test_band_values_recoverable() {
        let bytes = encode(&two_band_tile(), "cogeo").unwrap();
        let decoded = Tile::decode(bytes.as_slice()).unwrap();
        let layer = &decoded.layers[0];
        let first = &layer.features[0];
        let value_of = |pair: usize| {
            let index = first.tags[pair * 2 + 1] as usize;
            layer.values[index].double_value.unwrap()
        };
        assert_eq!(value_of(0), 1.0);
        assert_eq!(value_of(1), 10.0);
    }

    #[test]
    fn test_empty_mask_yields_empty_layer() {
        let mut tile = two_band_tile();
        tile.mask = vec![false; 4];
        let bytes = encode(&tile, "cogeo").unwrap();
        assert!(!bytes.is_empty());
        let decoded = Tile::decode(bytes.as_slice()).unwrap();
        assert!(decoded.layers[0].features.is_empty());
    }

    #[test]
    fn test_mask_length_mismatch() {
        let mut tile = two_band_tile();
        tile.mask = vec![true; 3];
        assert!(matches!(
            encode(&tile, "cogeo"),
            Err(EncodeError::DimensionMismatch { .. })
        ));
    }
}
