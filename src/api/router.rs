//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Layers (outermost → innermost): CORS → body size limit → handler.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::api::endpoints;
use crate::api::types::{ApiContext, MAX_BODY_BYTES};
use crate::core_state::CoreState;

pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

fn build_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/process_note", post(endpoints::notes::process_note))
        .route("/health", get(endpoints::health::check))
        .with_state(ctx)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}
