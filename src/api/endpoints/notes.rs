//! Note coding endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, NoteRequest};
use crate::models::FinalOutput;

/// `POST /process_note`: run the full pipeline on one note.
pub async fn process_note(
    State(ctx): State<ApiContext>,
    payload: Result<Json<NoteRequest>, JsonRejection>,
) -> Result<Json<FinalOutput>, ApiError> {
    let Json(request) = payload?;
    if request.note.trim().is_empty() {
        return Err(ApiError::BadRequest("note must not be empty".into()));
    }

    tracing::info!(note_chars = request.note.chars().count(), "Processing note");
    let result = ctx
        .core
        .processor()
        .process_note_with_timeout(&request.note)
        .await?;
    Ok(Json(result))
}
