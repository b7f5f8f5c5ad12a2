//! Route configuration and setup

use crate::api_doc::get_openapi_spec;
use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tarpaulin_core::Config;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and the text fields around the image.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    let body_limit = config.max_image_size_bytes() + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/photos", post(handlers::photos::upload_photo))
        .route("/photos/{id}", get(handlers::photos::get_photo))
        .route(
            "/media/photos/{filename}",
            get(handlers::media::download_media),
        )
        .route("/health", get(handlers::health::health))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(get_openapi_spec()) }),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(setup_cors())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

fn setup_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}
