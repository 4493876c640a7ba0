use cog_mvt_server::server::{create_app, AppState};
use cog_mvt_server::source::GeoTiffSource;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configured once at startup; the noisy transport crates are quieted
    // unless RUST_LOG overrides them
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,hyper=warn,reqwest=warn"),
    )
    .init();

    let bind = env::var("BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let state = AppState {
        source: Arc::new(GeoTiffSource::new()),
    };
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("Server listening on http://{}", bind);
    log::info!(
        "Try: http://{}/tiles/pixels/0/0/0?url=/path/to/raster.tif",
        bind
    );

    axum::serve(listener, app).await?;

    Ok(())
}
