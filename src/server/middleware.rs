//! Cross-cutting request middleware: cache-control injection, whole-request
//! timing and panic containment. CORS and compression come straight from
//! `tower-http` layers configured in [`super::create_app`].

use std::any::Any;

use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use http_body_util::Full;

use crate::timing::Timer;

/// Header carrying per-stage timings; handlers write the stage entries,
/// [`record_total_time`] appends the final total.
pub const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

const CACHE_CONTROL_VALUE: &str = "public, max-age=3600";
const CACHE_EXCLUDED_PATHS: &[&str] = &["/healthz"];

/// Attach the fixed public caching directive to cacheable responses.
///
/// Skipped for excluded paths, non-GET/HEAD methods, server errors and
/// responses that already chose their own directive.
pub async fn set_cache_control(request: Request, next: Next) -> Response {
    let excluded = CACHE_EXCLUDED_PATHS.contains(&request.uri().path());
    let cacheable_method = request.method() == Method::GET || request.method() == Method::HEAD;

    let mut response = next.run(request).await;

    if !excluded
        && cacheable_method
        && response.status().as_u16() < 500
        && !response.headers().contains_key(header::CACHE_CONTROL)
    {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_VALUE),
        );
    }
    response
}

/// Measure the whole request, middleware entry to exit, and append it to
/// `Server-Timing` last so it reflects overhead the handler-level stage
/// timings do not capture. Must be the outermost layer.
pub async fn record_total_time(request: Request, next: Next) -> Response {
    let timer = Timer::start();
    let mut response = next.run(request).await;

    let total = format!("total;dur={:.2}", timer.elapsed_ms());
    let merged = match response
        .headers()
        .get(&SERVER_TIMING)
        .and_then(|value| value.to_str().ok())
    {
        Some(existing) => format!("{existing}, {total}"),
        None => total,
    };
    if let Ok(value) = HeaderValue::from_str(&merged) {
        response.headers_mut().insert(SERVER_TIMING, value);
    }
    response
}

/// Panic boundary: log what escaped and answer with the same generic JSON
/// shape the error translation uses, leaking nothing.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> axum::http::Response<Full<Bytes>> {
    let message = panic
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned());
    match message {
        Some(message) => log::error!("handler panicked: {message}"),
        None => log::error!("handler panicked"),
    }

    axum::http::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(
            br#"{"detail":"internal server error"}"#,
        )))
        .unwrap()
}
