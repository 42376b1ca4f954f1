//! Web API router construction and shared response utilities.

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::state::AppState;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::{jobs, reference, status};

/// Cache-Control presets for public endpoints.
pub mod cache {
    /// Worlds and tax rates.
    pub const REFERENCE: &str = "public, max-age=300, stale-while-revalidate=300";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(header));
    response
}

/// Job endpoints return live state and must never be cached.
async fn no_store(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let job_router = Router::new()
        .route("/items/start/{ids}", get(jobs::start_items))
        .route(
            "/market-current/start/{world}/{ids}",
            get(jobs::start_market_current),
        )
        .route(
            "/market-historical/start/{world}/{ids}",
            get(jobs::start_market_historical),
        )
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/{id}/status", get(jobs::job_status))
        .route("/jobs/{id}/result", get(jobs::job_result))
        .layer(axum::middleware::map_response(no_store))
        .with_state(app_state.clone());

    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/worlds", get(reference::worlds))
        .route("/tax-rates/{world}", get(reference::tax_rates))
        .with_state(app_state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .nest("/api", job_router.merge(api_router))
        .layer((
            // Outermost: per-request ID span + severity-proportional response logging.
            RequestIdLayer,
            cors,
            CompressionLayer::new()
                .zstd(true)
                .br(true)
                .gzip(true)
                .quality(tower_http::CompressionLevel::Fastest),
            TimeoutLayer::new(Duration::from_secs(60)),
        ))
}
