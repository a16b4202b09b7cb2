use super::RetrievalError;
use crate::models::CodedEntry;

/// Maps a free-text query to the `k` most similar vocabulary entries.
///
/// Implementations are read-only after construction and shared across runs.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<CodedEntry>, RetrievalError>;

    /// Short strategy label for health reporting.
    fn strategy(&self) -> &'static str;
}

/// Embedding model abstraction. Must be deterministic for a given model name.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError>;
    fn dimension(&self) -> usize;
    /// Identifier recorded in the retriever cache.
    fn model_name(&self) -> &str;
}
