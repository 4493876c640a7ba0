//! Router assembly and the middleware stack applied to every route.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod tilejson;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::source::RasterSource;

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn RasterSource>,
}

pub fn create_app(state: AppState) -> Router {
    // Compress everything that negotiates an encoding, with no minimum
    // size; raster image media types are already compressed and excluded
    let compression = CompressionLayer::new()
        .compress_when(SizeAbove::new(1).and(NotForContentType::IMAGES));

    // Origins and headers are mirrored rather than wildcarded so that
    // credentialed requests stay valid
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::GET])
        .allow_headers(AllowHeaders::mirror_request());

    Router::new()
        .route("/info", get(handlers::dataset_info))
        .route("/statistics", get(handlers::dataset_statistics))
        .route("/tiles/pixels/:z/:x/:y", get(handlers::pixels_tile))
        .route("/tiles/shapes/:z/:x/:y", get(handlers::shapes_tile))
        .route("/tilejson.json", get(handlers::tilejson))
        .route("/healthz", get(handlers::healthz))
        // Layers wrap bottom-up: the panic boundary sits innermost, CORS
        // and compression wrap it so error responses keep their headers,
        // and total-time is outermost to see the full request cost
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .layer(axum::middleware::from_fn(middleware::set_cache_control))
        .layer(compression)
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::record_total_time))
        .with_state(state)
}
