//! Process-wide state built once at startup.
//!
//! Loads the vocabulary, brings up the retriever (cache or rebuild), the
//! completion backend and the agent definitions, and wires them into one
//! shared `NotesProcessor`. Construction makes blocking calls (embedding
//! probe, index build) and must run outside the async runtime.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{AppConfig, CompletionBackend, ConfigError, EmbeddingBackend, RetrieverKind};
use crate::models::CodedEntry;
use crate::pipeline::coding::{
    AgentDefinitions, CodingError, CompletionService, NotesProcessor, OllamaCompletion,
    OpenAiCompletion, StageDeps,
};
use crate::pipeline::reference::{load_vocabulary, ReferenceError, ReferenceValidator};
use crate::pipeline::retrieval::{
    EmbeddingModel, FuzzyRetriever, OllamaEmbedder, RetrievalError, Retriever, VectorRetriever,
};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Vocabulary error: {0}")]
    Reference(#[from] ReferenceError),
    #[error("Retriever error: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("Pipeline setup error: {0}")]
    Coding(#[from] CodingError),
    #[error("ONNX embeddings require building with the onnx-embeddings feature")]
    OnnxUnavailable,
}

// ═══════════════════════════════════════════════════════════
// CoreState: shared by the HTTP server and the CLI
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    processor: Arc<NotesProcessor>,
}

impl CoreState {
    /// Full startup from configuration. Any failure is fatal to the process.
    pub fn initialize(config: &AppConfig) -> Result<Self, CoreError> {
        let entries = load_vocabulary(&config.vocabulary_path)?;
        let validator = ReferenceValidator::new(entries.clone())?;
        tracing::info!(
            path = %config.vocabulary_path.display(),
            codes = validator.len(),
            "Reference vocabulary loaded"
        );

        let retriever = build_retriever(config, entries)?;
        let completion = build_completion(config)?;
        let agents = AgentDefinitions::load_or_default(config.agents_path.as_deref())?;

        let deps = StageDeps {
            completion,
            validator: Arc::new(validator),
            retriever,
            agents,
            num_candidates: config.num_candidates,
            max_retries: config.max_retries,
        };
        Ok(Self::from_deps(
            deps,
            config.max_concurrent,
            Duration::from_secs(config.run_timeout_secs),
        ))
    }

    /// Wrap pre-built collaborators.
    pub fn from_deps(deps: StageDeps, max_concurrent: usize, run_timeout: Duration) -> Self {
        Self {
            processor: Arc::new(NotesProcessor::new(deps, max_concurrent, run_timeout)),
        }
    }

    pub fn processor(&self) -> &Arc<NotesProcessor> {
        &self.processor
    }

    pub fn vocabulary_size(&self) -> usize {
        self.processor.deps().validator.len()
    }

    pub fn retriever_strategy(&self) -> &'static str {
        self.processor.deps().retriever.strategy()
    }

    pub fn completion_model(&self) -> &str {
        self.processor.deps().completion.model_name()
    }
}

// ── Collaborator construction ──────────────────────────────

pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn EmbeddingModel>, CoreError> {
    match config.embedding_backend {
        EmbeddingBackend::Ollama => {
            let embedder = OllamaEmbedder::connect(
                &config.embedding_url,
                &config.embedding_model,
                config.run_timeout_secs,
            )?;
            Ok(Arc::new(embedder))
        }
        #[cfg(feature = "onnx-embeddings")]
        EmbeddingBackend::Onnx => {
            let embedder = crate::pipeline::retrieval::OnnxEmbedder::load(
                &config.embedding_dir,
                &config.embedding_model,
            )?;
            Ok(Arc::new(embedder))
        }
        #[cfg(not(feature = "onnx-embeddings"))]
        EmbeddingBackend::Onnx => Err(CoreError::OnnxUnavailable),
    }
}

/// The configured retriever. The vector strategy reuses the on-disk cache
/// when it matches the vocabulary and the embedding model.
pub fn build_retriever(
    config: &AppConfig,
    entries: Vec<CodedEntry>,
) -> Result<Arc<dyn Retriever>, CoreError> {
    match config.retriever {
        RetrieverKind::Vector => {
            let embedder = build_embedder(config)?;
            let retriever = VectorRetriever::load_or_build(&config.cache_dir, entries, embedder)?;
            Ok(Arc::new(retriever))
        }
        RetrieverKind::Fuzzy => Ok(Arc::new(FuzzyRetriever::new(entries))),
    }
}

/// Rebuild the vector index from the vocabulary and overwrite the cache.
pub fn rebuild_index(config: &AppConfig) -> Result<VectorRetriever, CoreError> {
    let entries = load_vocabulary(&config.vocabulary_path)?;
    let embedder = build_embedder(config)?;
    let retriever = VectorRetriever::build(entries, embedder)?;
    retriever.save(&config.cache_dir)?;
    Ok(retriever)
}

pub fn build_completion(config: &AppConfig) -> Result<Arc<dyn CompletionService>, CoreError> {
    let completion: Arc<dyn CompletionService> = match config.completion_backend {
        CompletionBackend::Ollama => Arc::new(OllamaCompletion::new(
            &config.llm_url,
            &config.llm_model,
            config.run_timeout_secs,
        )?),
        CompletionBackend::OpenAi => {
            let api_key = config
                .openai_api_key
                .as_deref()
                .ok_or(ConfigError::MissingApiKey)?;
            Arc::new(OpenAiCompletion::new(
                &config.llm_url,
                &config.llm_model,
                api_key,
                config.run_timeout_secs,
            )?)
        }
    };
    tracing::info!(
        backend = ?config.completion_backend,
        model = completion.model_name(),
        "Completion backend ready"
    );
    Ok(completion)
}
