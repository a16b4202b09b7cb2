//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub vocabulary_size: usize,
    pub retriever: &'static str,
}

/// `GET /health`
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        vocabulary_size: ctx.core.vocabulary_size(),
        retriever: ctx.core.retriever_strategy(),
    })
}
