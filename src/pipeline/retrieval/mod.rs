pub mod types;
pub mod embedder;
pub mod index;
pub mod persist;
pub mod vector;
pub mod fuzzy;

pub use embedder::*;
pub use fuzzy::*;
pub use types::*;
pub use vector::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache was built with embedding model '{saved}', configured model is '{configured}'")]
    ConfigMismatch { saved: String, configured: String },

    #[error("Retriever cache is corrupt: {0}")]
    CorruptCache(String),

    #[error("Cannot build a retriever over an empty corpus")]
    EmptyCorpus,

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Embedding model initialization: {0}")]
    ModelInit(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),
}
