//! Layer and geometry builders for the MVT command stream.

use std::collections::HashMap;

use prost::Message;

use super::vector_tile::{tile, Tile};

/// Tile-internal coordinate span, the de-facto standard extent.
pub const DEFAULT_EXTENT: u32 = 4096;
/// Vector tile spec version written into every layer.
pub const MVT_VERSION: u32 = 2;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// Typed property value attached to a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Double(f64),
    Uint(u64),
}

/// Hashable identity for value deduplication (doubles compare by bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Str(String),
    Double(u64),
    Uint(u64),
}

fn value_key(value: &PropValue) -> ValueKey {
    match value {
        PropValue::Str(text) => ValueKey::Str(text.clone()),
        PropValue::Double(number) => ValueKey::Double(number.to_bits()),
        PropValue::Uint(number) => ValueKey::Uint(*number),
    }
}

fn to_wire_value(value: PropValue) -> tile::Value {
    let mut wire = tile::Value::default();
    match value {
        PropValue::Str(text) => wire.string_value = Some(text),
        PropValue::Double(number) => wire.double_value = Some(number),
        PropValue::Uint(number) => wire.uint_value = Some(number),
    }
    wire
}

/// Accumulates one layer's features with deduplicated key/value tables.
pub struct LayerBuilder {
    name: String,
    extent: u32,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<tile::Value>,
    value_index: HashMap<ValueKey, u32>,
    features: Vec<tile::Feature>,
}

impl LayerBuilder {
    pub fn new(name: &str) -> Self {
        LayerBuilder {
            name: name.to_string(),
            extent: DEFAULT_EXTENT,
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
            features: Vec::new(),
        }
    }

    /// Index of `key` in the layer key table, interning it on first use.
    pub fn key(&mut self, key: &str) -> u32 {
        if let Some(&index) = self.key_index.get(key) {
            return index;
        }
        let index = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), index);
        index
    }

    /// Index of `value` in the layer value table, interning it on first use.
    pub fn value(&mut self, value: PropValue) -> u32 {
        let identity = value_key(&value);
        if let Some(&index) = self.value_index.get(&identity) {
            return index;
        }
        let index = self.values.len() as u32;
        self.values.push(to_wire_value(value));
        self.value_index.insert(identity, index);
        index
    }

    pub fn polygon(&mut self, id: u64, tags: Vec<u32>, geometry: Vec<u32>) {
        self.features.push(tile::Feature {
            id: Some(id),
            tags,
            r#type: Some(tile::GeomType::Polygon as i32),
            geometry,
        });
    }

    pub fn into_tile(self) -> Tile {
        Tile {
            layers: vec![tile::Layer {
                version: MVT_VERSION,
                name: self.name,
                features: self.features,
                keys: self.keys,
                values: self.values,
                extent: Some(self.extent),
            }],
        }
    }

    pub fn encode(self) -> Vec<u8> {
        self.into_tile().encode_to_vec()
    }
}

/// Writes command/parameter integers while tracking the geometry cursor,
/// so consecutive rings delta-encode correctly.
pub struct GeomWriter {
    commands: Vec<u32>,
    cursor_x: i64,
    cursor_y: i64,
}

impl GeomWriter {
    pub fn new() -> Self {
        GeomWriter {
            commands: Vec::new(),
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    /// Append an axis-aligned rectangle as one exterior ring. Vertices are
    /// wound clockwise in screen coordinates, which the spec requires for
    /// exterior rings.
    pub fn rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) {
        self.commands.push(command(CMD_MOVE_TO, 1));
        self.push_point(x0, y0);
        self.commands.push(command(CMD_LINE_TO, 3));
        self.push_point(x1, y0);
        self.push_point(x1, y1);
        self.push_point(x0, y1);
        self.commands.push(command(CMD_CLOSE_PATH, 1));
    }

    pub fn finish(self) -> Vec<u32> {
        self.commands
    }

    fn push_point(&mut self, x: i64, y: i64) {
        self.commands.push(zigzag(x - self.cursor_x));
        self.commands.push(zigzag(y - self.cursor_y));
        self.cursor_x = x;
        self.cursor_y = y;
    }
}

impl Default for GeomWriter {
    fn default() -> Self {
        GeomWriter::new()
    }
}

fn command(id: u32, count: u32) -> u32 {
    (count << 3) | id
}

fn zigzag(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}
