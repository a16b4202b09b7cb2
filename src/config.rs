use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "icd-coder";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Embedding model used for the ONNX backend and recorded in `model_name.txt`.
pub const DEFAULT_ONNX_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
/// Same model as published in the Ollama library.
pub const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "all-minilm";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Related codes retrieved per candidate.
pub const DEFAULT_NUM_CANDIDATES: usize = 10;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Generation settings shared by both completion backends.
pub const COMPLETION_TEMPERATURE: f32 = 0.1;
pub const COMPLETION_MAX_TOKENS: u32 = 1024;

// Retriever cache file names. All four must be present together.
pub const DOCUMENTS_FILE: &str = "documents.json";
pub const MODEL_NAME_FILE: &str = "model_name.txt";
pub const INDEX_FILE: &str = "index.faiss";
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "icd_coder_lib=info,icd_coder=info,tower_http=warn"
}

/// Get the application data directory (~/.icd-coder/)
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".icd-coder")
}

/// Get the models directory (for ONNX embeddings)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the embedding model directory (all-MiniLM-L6-v2)
pub fn embedding_model_dir() -> PathBuf {
    models_dir().join("all-MiniLM-L6-v2")
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("OPENAI_API_KEY is required for the openai completion backend")]
    MissingApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Ollama,
    Onnx,
}

/// Related-code retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieverKind {
    Vector,
    Fuzzy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionBackend {
    Ollama,
    OpenAi,
}

/// Runtime configuration, read from `ICD_CODER_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub vocabulary_path: PathBuf,
    pub cache_dir: PathBuf,
    pub agents_path: Option<PathBuf>,
    pub retriever: RetrieverKind,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_dir: PathBuf,
    /// Ollama endpoint for the `ollama` embedding backend.
    pub embedding_url: String,
    pub completion_backend: CompletionBackend,
    pub llm_url: String,
    pub llm_model: String,
    pub openai_api_key: Option<String>,
    pub num_candidates: usize,
    pub max_concurrent: usize,
    pub run_timeout_secs: u64,
    pub max_retries: u32,
    pub bind: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset and empty keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let embedding_backend = match get("ICD_CODER_EMBEDDING_BACKEND").as_deref() {
            None | Some("ollama") => EmbeddingBackend::Ollama,
            Some("onnx") => EmbeddingBackend::Onnx,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "ICD_CODER_EMBEDDING_BACKEND",
                    value: other.to_string(),
                })
            }
        };
        let retriever = match get("ICD_CODER_RETRIEVER").as_deref() {
            None | Some("vector") => RetrieverKind::Vector,
            Some("fuzzy") => RetrieverKind::Fuzzy,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "ICD_CODER_RETRIEVER",
                    value: other.to_string(),
                })
            }
        };
        let completion_backend = match get("ICD_CODER_COMPLETION_BACKEND").as_deref() {
            None | Some("ollama") => CompletionBackend::Ollama,
            Some("openai") => CompletionBackend::OpenAi,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "ICD_CODER_COMPLETION_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let openai_api_key = get("OPENAI_API_KEY");
        if completion_backend == CompletionBackend::OpenAi && openai_api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        let default_embedding_model = match embedding_backend {
            EmbeddingBackend::Ollama => DEFAULT_OLLAMA_EMBEDDING_MODEL,
            EmbeddingBackend::Onnx => DEFAULT_ONNX_EMBEDDING_MODEL,
        };
        let (default_url, default_model) = match completion_backend {
            CompletionBackend::Ollama => (DEFAULT_OLLAMA_URL, DEFAULT_OLLAMA_MODEL),
            CompletionBackend::OpenAi => (DEFAULT_OPENAI_URL, DEFAULT_OPENAI_MODEL),
        };

        let data_dir = app_data_dir();
        Ok(Self {
            vocabulary_path: get("ICD_CODER_VOCABULARY")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("icd10cm.tsv")),
            cache_dir: get("ICD_CODER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("index")),
            agents_path: get("ICD_CODER_AGENTS").map(PathBuf::from),
            retriever,
            embedding_backend,
            embedding_model: get("ICD_CODER_EMBEDDING_MODEL")
                .unwrap_or_else(|| default_embedding_model.to_string()),
            embedding_dir: get("ICD_CODER_EMBEDDING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(embedding_model_dir),
            embedding_url: get("ICD_CODER_EMBEDDING_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            completion_backend,
            llm_url: get("ICD_CODER_LLM_URL").unwrap_or_else(|| default_url.to_string()),
            llm_model: get("ICD_CODER_LLM_MODEL").unwrap_or_else(|| default_model.to_string()),
            openai_api_key,
            num_candidates: parse_or(&get, "ICD_CODER_NUM_CANDIDATES", DEFAULT_NUM_CANDIDATES)?,
            max_concurrent: parse_or(&get, "ICD_CODER_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)?
                .max(1),
            run_timeout_secs: parse_or(
                &get,
                "ICD_CODER_RUN_TIMEOUT_SECS",
                DEFAULT_RUN_TIMEOUT_SECS,
            )?,
            max_retries: parse_or(&get, "ICD_CODER_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            bind: match get("ICD_CODER_BIND") {
                Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                    key: "ICD_CODER_BIND",
                    value: raw,
                })?,
                None => DEFAULT_BIND.parse().map_err(|_| ConfigError::Invalid {
                    key: "ICD_CODER_BIND",
                    value: DEFAULT_BIND.to_string(),
                })?,
            },
        })
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with(".icd-coder"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.embedding_backend, EmbeddingBackend::Ollama);
        assert_eq!(config.embedding_model, DEFAULT_OLLAMA_EMBEDDING_MODEL);
        assert_eq!(config.completion_backend, CompletionBackend::Ollama);
        assert_eq!(config.llm_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.num_candidates, 10);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.bind.port(), 8000);
        assert!(config.agents_path.is_none());
        assert_eq!(config.retriever, RetrieverKind::Vector);
        assert_eq!(config.embedding_url, DEFAULT_OLLAMA_URL);
        assert!(config.cache_dir.starts_with(app_data_dir()));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("ICD_CODER_VOCABULARY", "/data/codes.tsv"),
            ("ICD_CODER_EMBEDDING_BACKEND", "onnx"),
            ("ICD_CODER_NUM_CANDIDATES", "5"),
            ("ICD_CODER_MAX_CONCURRENT", "0"),
            ("ICD_CODER_BIND", "127.0.0.1:9000"),
            ("ICD_CODER_RETRIEVER", "fuzzy"),
        ])
        .unwrap();
        assert_eq!(config.vocabulary_path, PathBuf::from("/data/codes.tsv"));
        assert_eq!(config.embedding_model, DEFAULT_ONNX_EMBEDDING_MODEL);
        assert_eq!(config.num_candidates, 5);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.bind.to_string(), "127.0.0.1:9000");
        assert_eq!(config.retriever, RetrieverKind::Fuzzy);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = config_from(&[("ICD_CODER_NUM_CANDIDATES", "  ")]).unwrap();
        assert_eq!(config.num_candidates, DEFAULT_NUM_CANDIDATES);
    }

    #[test]
    fn openai_requires_api_key() {
        let err = config_from(&[("ICD_CODER_COMPLETION_BACKEND", "openai")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey);

        let config = config_from(&[
            ("ICD_CODER_COMPLETION_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
        ])
        .unwrap();
        assert_eq!(config.llm_model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.llm_url, DEFAULT_OPENAI_URL);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            config_from(&[("ICD_CODER_NUM_CANDIDATES", "ten")]),
            Err(ConfigError::Invalid { key: "ICD_CODER_NUM_CANDIDATES", .. })
        ));
        assert!(matches!(
            config_from(&[("ICD_CODER_EMBEDDING_BACKEND", "faiss")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            config_from(&[("ICD_CODER_BIND", "nowhere")]),
            Err(ConfigError::Invalid { key: "ICD_CODER_BIND", .. })
        ));
    }
}
