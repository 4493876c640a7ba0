//! TileJSON manifest construction.
//!
//! Pure functions of the request's own base address and the dataset's
//! bounds/zoom range; nothing here performs I/O. The templated tile URL
//! must survive arbitrary source URLs, so the query string is re-encoded
//! rather than concatenated.

use axum::http::{header, HeaderMap};
use serde::Serialize;
use url::form_urlencoded;

use crate::encoding::TileEncoding;

/// Self-describing tile-index document (TileJSON 2.1.0).
#[derive(Debug, Clone, Serialize)]
pub struct TileJson {
    pub tilejson: &'static str,
    pub name: String,
    /// Geographic bounds `[west, south, east, north]`.
    pub bounds: [f64; 4],
    pub minzoom: u8,
    pub maxzoom: u8,
    pub tiles: Vec<String>,
}

/// Query parameters replayed into the templated tile URL so a client can
/// reconstruct tile requests from the manifest alone.
#[derive(Debug, Clone, Copy)]
pub struct TileQueryParams<'a> {
    pub source_url: &'a str,
    pub tile_size: Option<u32>,
    pub band_index: Option<usize>,
}

pub fn build_manifest(
    base_url: &str,
    encoding: TileEncoding,
    bounds: [f64; 4],
    minzoom: u8,
    maxzoom: u8,
    name: &str,
    params: &TileQueryParams<'_>,
) -> TileJson {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("url", params.source_url);
    if let Some(size) = params.tile_size {
        query.append_pair("tilesize", &size.to_string());
    }
    if let Some(band) = params.band_index {
        query.append_pair("bidx", &band.to_string());
    }

    let tile_url = format!(
        "{}/tiles/{}/{{z}}/{{x}}/{{y}}?{}",
        base_url.trim_end_matches('/'),
        encoding.route_name(),
        query.finish()
    );

    TileJson {
        tilejson: "2.1.0",
        name: name.to_string(),
        bounds,
        minzoom,
        maxzoom,
        tiles: vec![tile_url],
    }
}

/// Reconstruct the externally visible base URL from request headers,
/// honoring forwarding proxies.
pub fn request_base_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(source_url: &str) -> TileQueryParams<'_> {
        TileQueryParams {
            source_url,
            tile_size: None,
            band_index: None,
        }
    }

    #[test]
    fn test_template_placeholders_survive() {
        let manifest = build_manifest(
            "http://tiles.example.com",
            TileEncoding::Pixels,
            [-180.0, -85.0, 180.0, 85.0],
            0,
            12,
            "cogeo",
            &params("s3://bucket/a.tif"),
        );
        let tile_url = &manifest.tiles[0];
        assert!(tile_url.starts_with("http://tiles.example.com/tiles/pixels/{z}/{x}/{y}?"));
        assert!(tile_url.contains("url=s3%3A%2F%2Fbucket%2Fa.tif"));
    }

    #[test]
    fn test_shapes_route_with_discriminators() {
        let manifest = build_manifest(
            "http://localhost",
            TileEncoding::Shapes,
            [0.0, 0.0, 1.0, 1.0],
            3,
            9,
            "cogeo",
            &TileQueryParams {
                source_url: "https://example.com/cat.tif",
                tile_size: Some(512),
                band_index: Some(2),
            },
        );
        let tile_url = &manifest.tiles[0];
        assert!(tile_url.contains("/tiles/shapes/"));
        assert!(tile_url.contains("tilesize=512"));
        assert!(tile_url.contains("bidx=2"));
        assert_eq!(manifest.minzoom, 3);
        assert_eq!(manifest.maxzoom, 9);
    }

    #[test]
    fn test_base_url_from_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("tiles.example.com"));
        assert_eq!(request_base_url(&headers), "http://tiles.example.com");
    }

    #[test]
    fn test_base_url_honors_forwarding() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:8080"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("maps.example.com"));
        assert_eq!(request_base_url(&headers), "https://maps.example.com");
    }

    #[test]
    fn test_base_url_fallback() {
        assert_eq!(request_base_url(&HeaderMap::new()), "http://localhost");
    }
}
