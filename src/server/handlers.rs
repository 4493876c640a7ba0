//! HTTP request handlers.
//!
//! Each handler validates its query parameters up front (so bad requests
//! fail before any source is opened), then runs the blocking source read
//! and encode stages on the blocking pool. Tile responses carry a
//! `Server-Timing` header with one entry per stage in capture order.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task;

use crate::encoding::{TileEncoding, LAYER_NAME};
use crate::server::error::ApiError;
use crate::server::middleware::SERVER_TIMING;
use crate::server::tilejson::{self, TileJson, TileQueryParams};
use crate::server::AppState;
use crate::source::{BandStatistics, DatasetInfo, PixelTile, SourceError, TileReadOptions};
use crate::tile::TileCoord;
use crate::timing::{Timer, Timings};

const DEFAULT_TILE_SIZE: u32 = 256;
const MAX_TILE_SIZE: u32 = 4096;

// Query models deserialize as raw strings; parsing by hand keeps malformed
// values on the same JSON error path as every other failure.

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    url: Option<String>,
    reduced: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TileQuery {
    url: Option<String>,
    tilesize: Option<String>,
    bidx: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TileJsonQuery {
    url: Option<String>,
    mvt_type: Option<String>,
    tilesize: Option<String>,
    bidx: Option<String>,
}

/// Full dataset description, the default `/info` shape.
#[derive(Debug, Serialize)]
struct InfoResponse {
    bounds: [f64; 4],
    minzoom: u8,
    maxzoom: u8,
    center: [f64; 3],
    band_descriptions: Vec<String>,
    dtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodata_value: Option<f64>,
}

/// Reduced `/info` shape: bounds and band layout without the zoom range
/// or center.
#[derive(Debug, Serialize)]
struct InfoSummary {
    bounds: [f64; 4],
    band_descriptions: Vec<String>,
    dtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodata_value: Option<f64>,
}

/// Handle `/info` requests.
pub async fn dataset_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> Result<Response, ApiError> {
    let url = query.url.ok_or(ApiError::MissingParameter("url"))?;
    let reduced = parse_param::<bool>(query.reduced, "reduced")?.unwrap_or(false);

    let info = read_info(&state, url).await?;

    let response = if reduced {
        Json(InfoSummary {
            bounds: info.bounds,
            band_descriptions: info.band_names,
            dtype: info.dtype,
            nodata_value: info.nodata_value,
        })
        .into_response()
    } else {
        Json(InfoResponse {
            bounds: info.bounds,
            minzoom: info.minzoom,
            maxzoom: info.maxzoom,
            center: [info.center.0, info.center.1, info.minzoom as f64],
            band_descriptions: info.band_names,
            dtype: info.dtype,
            nodata_value: info.nodata_value,
        })
        .into_response()
    };
    Ok(response)
}

/// Handle `/statistics` requests.
pub async fn dataset_statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<BTreeMap<String, BandStatistics>>, ApiError> {
    let url = query.url.ok_or(ApiError::MissingParameter("url"))?;

    let source = state.source.clone();
    let statistics = task::spawn_blocking(
        move || -> Result<BTreeMap<String, BandStatistics>, SourceError> {
            let mut reader = source.open(&url)?;
            reader.statistics()
        },
    )
    .await
    .map_err(|_| ApiError::Internal)??;

    Ok(Json(statistics))
}

/// Handle `/tiles/pixels/{z}/{x}/{y}` requests.
pub async fn pixels_tile(
    state: State<AppState>,
    path: Path<(String, String, String)>,
    query: Query<TileQuery>,
) -> Result<Response, ApiError> {
    vector_tile(TileEncoding::Pixels, state, path, query).await
}

/// Handle `/tiles/shapes/{z}/{x}/{y}` requests.
pub async fn shapes_tile(
    state: State<AppState>,
    path: Path<(String, String, String)>,
    query: Query<TileQuery>,
) -> Result<Response, ApiError> {
    vector_tile(TileEncoding::Shapes, state, path, query).await
}

/// Shared tile pipeline, parameterized by encoding strategy.
async fn vector_tile(
    encoding: TileEncoding,
    State(state): State<AppState>,
    Path((z, x, y)): Path<(String, String, String)>,
    Query(query): Query<TileQuery>,
) -> Result<Response, ApiError> {
    let coord = TileCoord::new(
        parse_coord(&z, "z")?,
        parse_coord(&x, "x")?,
        parse_coord(&y, "y")?,
    );
    let url = query.url.ok_or(ApiError::MissingParameter("url"))?;
    let tile_size = parse_param::<u32>(query.tilesize, "tilesize")?.unwrap_or(DEFAULT_TILE_SIZE);
    if tile_size == 0 || tile_size > MAX_TILE_SIZE {
        return Err(ApiError::InvalidParameter {
            name: "tilesize",
            reason: format!("must be between 1 and {MAX_TILE_SIZE}"),
        });
    }
    let band_index = parse_param::<usize>(query.bidx, "bidx")?;
    if encoding.requires_band_index() && band_index.is_none() {
        return Err(ApiError::MissingParameter("bidx"));
    }
    if band_index == Some(0) {
        return Err(ApiError::InvalidParameter {
            name: "bidx",
            reason: "band indexes start at 1".to_string(),
        });
    }

    log::info!("encoding {} tile {} from {}", encoding.route_name(), coord, url);
    let mut timings = Timings::new();
    let options = TileReadOptions {
        tile_size,
        band_index,
    };

    let source = state.source.clone();
    let timer = Timer::start();
    let tile = task::spawn_blocking(move || -> Result<PixelTile, SourceError> {
        let mut reader = source.open(&url)?;
        reader.tile(coord, &options)
    })
    .await
    .map_err(|_| ApiError::Internal)??;
    timings.record("source-read", timer.elapsed_ms());

    let timer = Timer::start();
    let body = task::spawn_blocking(move || encoding.encode(&tile, LAYER_NAME))
        .await
        .map_err(|_| ApiError::Internal)??;
    timings.record("encode", timer.elapsed_ms());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-protobuf"),
    );
    if let Ok(value) = HeaderValue::from_str(&timings.header_value()) {
        headers.insert(SERVER_TIMING, value);
    }
    Ok((headers, body).into_response())
}

/// Handle `/tilejson.json` requests.
pub async fn tilejson(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TileJsonQuery>,
) -> Result<Json<TileJson>, ApiError> {
    let url = query.url.ok_or(ApiError::MissingParameter("url"))?;
    let encoding =
        parse_param::<TileEncoding>(query.mvt_type, "mvt_type")?.unwrap_or(TileEncoding::Pixels);
    let tile_size = parse_param::<u32>(query.tilesize, "tilesize")?;
    let band_index = parse_param::<usize>(query.bidx, "bidx")?;
    if encoding.requires_band_index() && band_index.is_none() {
        return Err(ApiError::MissingParameter("bidx"));
    }

    let info = read_info(&state, url.clone()).await?;

    let manifest = tilejson::build_manifest(
        &tilejson::request_base_url(&headers),
        encoding,
        info.bounds,
        info.minzoom,
        info.maxzoom,
        LAYER_NAME,
        &TileQueryParams {
            source_url: &url,
            tile_size,
            band_index,
        },
    );
    Ok(Json(manifest))
}

/// Handle `/healthz` requests.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ping": "pong!" }))
}

/// Open the source and read metadata only, on the blocking pool.
async fn read_info(state: &AppState, url: String) -> Result<DatasetInfo, ApiError> {
    let source = state.source.clone();
    let info = task::spawn_blocking(move || -> Result<DatasetInfo, SourceError> {
        let reader = source.open(&url)?;
        reader.info()
    })
    .await
    .map_err(|_| ApiError::Internal)??;
    Ok(info)
}

fn parse_coord(raw: &str, name: &'static str) -> Result<u32, ApiError> {
    raw.parse::<u32>().map_err(|_| ApiError::InvalidParameter {
        name,
        reason: format!("cannot parse '{raw}' as a tile coordinate"),
    })
}

fn parse_param<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
) -> Result<Option<T>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ApiError::InvalidParameter {
                name,
                reason: format!("cannot parse '{raw}'"),
            }),
    }
}
