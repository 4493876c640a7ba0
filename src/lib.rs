//! HTTP service turning cloud-optimized GeoTIFFs into Mapbox Vector Tiles.
//!
//! The request pipeline is: open the raster named by the `url` query
//! parameter, extract a square pixel window for the requested `z/x/y`
//! coordinate, then encode it with one of two strategies (`pixels` emits a
//! polygon per sample cell, `shapes` merges cells by color-mapped value).
//! Auxiliary routes expose dataset metadata, per-band statistics and a
//! TileJSON manifest for client auto-configuration.

pub mod encoding;
pub mod projection;
pub mod server;
pub mod source;
pub mod tile;
pub mod timing;
