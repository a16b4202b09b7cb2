//! Shared types for the API layer.

use std::sync::Arc;

use serde::Deserialize;

use crate::core_state::CoreState;

/// Request bodies larger than this are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}

/// `POST /process_note` body.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}
