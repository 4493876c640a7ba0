//! Full-router tests: routes, middleware behavior and error translation,
//! driven through `tower::ServiceExt::oneshot` with a fake raster source.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use prost::Message;
use serde_json::Value;
use tower::ServiceExt;

use cog_mvt_server::encoding::vector_tile::Tile as MvtTile;
use cog_mvt_server::server::{create_app, AppState};
use cog_mvt_server::source::{
    BandStatistics, ColorMap, DatasetInfo, PixelTile, RasterSource, SourceError, SourceReader,
    TileReadOptions,
};
use cog_mvt_server::tile::TileCoord;

/// In-memory source: a 4x4 single-band dataset with a two-entry color map.
/// URLs containing "missing" fail to open; URLs containing "empty" yield a
/// fully masked tile.
#[derive(Default)]
struct FakeSource {
    opens: AtomicUsize,
}

impl FakeSource {
    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl RasterSource for FakeSource {
    fn open(&self, url: &str) -> Result<Box<dyn SourceReader>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if url.contains("missing") {
            return Err(SourceError::NotFound(url.to_string()));
        }
        Ok(Box::new(FakeReader {
            empty: url.contains("empty"),
        }))
    }
}

struct FakeReader {
    empty: bool,
}

impl SourceReader for FakeReader {
    fn info(&self) -> Result<DatasetInfo, SourceError> {
        Ok(DatasetInfo {
            bounds: [-10.0, -10.0, 10.0, 10.0],
            minzoom: 2,
            maxzoom: 10,
            center: (0.0, 0.0),
            band_names: vec!["b1".to_string()],
            dtype: "uint8".to_string(),
            nodata_value: Some(0.0),
        })
    }

    fn statistics(&mut self) -> Result<BTreeMap<String, BandStatistics>, SourceError> {
        let mut stats = BTreeMap::new();
        stats.insert(
            "b1".to_string(),
            BandStatistics {
                min: 1.0,
                max: 2.0,
                mean: 1.5,
                std: 0.5,
                count: 16,
                sum: 24.0,
                valid_percent: 100.0,
                percentile_2: 1.0,
                percentile_98: 2.0,
            },
        );
        Ok(stats)
    }

    fn tile(
        &mut self,
        _coord: TileCoord,
        options: &TileReadOptions,
    ) -> Result<PixelTile, SourceError> {
        if let Some(band) = options.band_index {
            if band != 1 {
                return Err(SourceError::BandIndex(band));
            }
        }
        let mut colormap = ColorMap::new();
        colormap.insert(1, [255, 0, 0, 255]);
        colormap.insert(2, [0, 0, 255, 255]);
        Ok(PixelTile {
            width: 4,
            height: 4,
            band_names: vec!["b1".to_string()],
            bands: vec![(0..16).map(|cell| 1.0 + (cell % 2) as f64).collect()],
            mask: vec![!self.empty; 16],
            colormap: Some(colormap),
        })
    }
}

fn app_with(source: Arc<FakeSource>) -> Router {
    create_app(AppState { source })
}

fn app() -> Router {
    app_with(Arc::new(FakeSource::default()))
}

async fn get(app: Router, uri: &str) -> axum::response::Response {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    )
    .await
    .expect("response")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_healthz() {
    let response = get(app(), "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CACHE_CONTROL).is_none());
    let body = body_json(response).await;
    assert_eq!(body, serde_json::json!({ "ping": "pong!" }));
}

#[tokio::test]
async fn test_info_full_shape() {
    let response = get(app(), "/info?url=demo.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=3600"
    );
    let body = body_json(response).await;
    assert_eq!(body["minzoom"], 2);
    assert_eq!(body["maxzoom"], 10);
    assert_eq!(body["dtype"], "uint8");
    assert_eq!(body["band_descriptions"][0], "b1");
}

#[tokio::test]
async fn test_info_reduced_shape_omits_zoom_fields() {
    let response = get(app(), "/info?url=demo.tif&reduced=true").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.get("minzoom").is_none());
    assert!(body.get("maxzoom").is_none());
    assert!(body.get("center").is_none());
    assert_eq!(body["dtype"], "uint8");
}

#[tokio::test]
async fn test_info_missing_url() {
    let response = get(app(), "/info").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("url"));
}

#[tokio::test]
async fn test_unresolvable_source_maps_to_404() {
    let response = get(app(), "/info?url=missing.tif").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("missing.tif"));
}

#[tokio::test]
async fn test_statistics() {
    let response = get(app(), "/statistics?url=demo.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["b1"]["count"], 16);
    assert_eq!(body["b1"]["valid_percent"], 100.0);
}

#[tokio::test]
async fn test_pixels_tile_response() {
    let response = get(app(), "/tiles/pixels/10/301/384?url=demo.tif&tilesize=256").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-protobuf"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=3600"
    );

    let timing = response
        .headers()
        .get("server-timing")
        .expect("server-timing header")
        .to_str()
        .expect("ascii header")
        .to_string();
    let read_at = timing.find("source-read;dur=").expect("source-read entry");
    let encode_at = timing.find("encode;dur=").expect("encode entry");
    let total_at = timing.find("total;dur=").expect("total entry");
    assert!(read_at < encode_at);
    assert!(encode_at < total_at);
    // total is the last entry
    assert!(!timing[total_at..].contains(','));

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    assert!(!bytes.is_empty());
    let tile = MvtTile::decode(bytes.as_ref()).expect("valid mvt");
    assert_eq!(tile.layers[0].name, "cogeo");
    assert_eq!(tile.layers[0].features.len(), 16);
}

#[tokio::test]
async fn test_shapes_tile_response() {
    let response = get(app(), "/tiles/shapes/10/301/384?url=demo.tif&bidx=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let tile = MvtTile::decode(bytes.as_ref()).expect("valid mvt");
    // One feature per distinct value
    assert_eq!(tile.layers[0].features.len(), 2);
}

#[tokio::test]
async fn test_shapes_missing_bidx_rejected_before_open() {
    let source = Arc::new(FakeSource::default());
    let response = get(
        app_with(source.clone()),
        "/tiles/shapes/10/301/384?url=demo.tif",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(source.open_count(), 0);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("bidx"));
}

#[tokio::test]
async fn test_empty_tile_still_encodes() {
    let response = get(app(), "/tiles/pixels/10/301/384?url=empty.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    assert!(!bytes.is_empty());
    let tile = MvtTile::decode(bytes.as_ref()).expect("valid mvt");
    assert!(tile.layers[0].features.is_empty());
}

#[tokio::test]
async fn test_non_numeric_coordinate() {
    let response = get(app(), "/tiles/pixels/10/301/abc?url=demo.tif").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("abc"));
}

#[tokio::test]
async fn test_invalid_tilesize() {
    let response = get(app(), "/tiles/pixels/10/301/384?url=demo.tif&tilesize=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unsupported_band_index() {
    let response = get(app(), "/tiles/pixels/10/301/384?url=demo.tif&bidx=5").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tilejson_round_trips_to_tile_request() {
    let response = get(app(), "/tilejson.json?url=demo.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tilejson"], "2.1.0");
    assert_eq!(body["minzoom"], 2);
    assert_eq!(body["maxzoom"], 10);

    let template = body["tiles"][0].as_str().expect("templated url");
    assert!(template.contains("/tiles/pixels/{z}/{x}/{y}?"));

    let concrete = template
        .replace("{z}", "10")
        .replace("{x}", "301")
        .replace("{y}", "384");
    let path = concrete
        .strip_prefix("http://localhost")
        .expect("base url prefix");
    let tile_response = get(app(), path).await;
    assert_eq!(tile_response.status(), StatusCode::OK);
    assert_eq!(
        tile_response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-protobuf"
    );
}

#[tokio::test]
async fn test_tilejson_shapes_variant() {
    let response = get(app(), "/tilejson.json?url=demo.tif&mvt_type=shapes&bidx=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let template = body["tiles"][0].as_str().expect("templated url");
    assert!(template.contains("/tiles/shapes/{z}/{x}/{y}?"));
    assert!(template.contains("bidx=1"));
}

#[tokio::test]
async fn test_tilejson_shapes_requires_bidx() {
    let response = get(app(), "/tilejson.json?url=demo.tif&mvt_type=shapes").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cors_headers_mirror_origin() {
    let app = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header(header::ORIGIN, "https://viewer.example.com")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .expect("cors origin"),
        "https://viewer.example.com"
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .expect("cors credentials"),
        "true"
    );
}

#[tokio::test]
async fn test_error_responses_keep_cors_headers() {
    let app = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/info?url=missing.tif")
                .header(header::ORIGIN, "https://viewer.example.com")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_some());
}
