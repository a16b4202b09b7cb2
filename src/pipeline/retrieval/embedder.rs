use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::EmbeddingModel;
use super::RetrievalError;

/// Output dimension of all-MiniLM-L6-v2
pub const MINILM_DIM: usize = 384;

/// Texts per `/api/embed` request.
const OLLAMA_EMBED_BATCH: usize = 64;

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX Embedder: behind `onnx-embeddings` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use super::{l2_normalize, EmbeddingModel, RetrievalError, MINILM_DIM};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// all-MiniLM-L6-v2 through ONNX Runtime, mean pooled and L2 normalized.
    ///
    /// `model_dir` must contain `model.onnx` and `tokenizer.json`.
    /// The session sits behind a Mutex because `Session::run` takes `&mut self`.
    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
        model_name: String,
    }

    impl OnnxEmbedder {
        pub fn load(model_dir: &Path, model_name: &str) -> Result<Self, RetrievalError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            for required in [&model_path, &tokenizer_path] {
                if !required.exists() {
                    return Err(RetrievalError::ModelNotFound(required.clone()));
                }
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| RetrievalError::ModelInit(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| RetrievalError::ModelInit(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| {
                    RetrievalError::ModelInit(format!("ONNX load failed: {e}"))
                })?;

            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| RetrievalError::ModelInit(format!("Tokenizer load failed: {e}")))?;

            tracing::info!(dir = %model_dir.display(), model = model_name, "ONNX embedder loaded");

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
                model_name: model_name.to_string(),
            })
        }

        fn infer(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            use ort::value::TensorRef;

            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| RetrievalError::Embedding(format!("Tokenization: {e}")))?;

            let to_i64 = |values: &[u32]| values.iter().map(|&v| v as i64).collect::<Vec<_>>();
            let input_ids = to_i64(encoding.get_ids());
            let attention_mask = to_i64(encoding.get_attention_mask());
            let token_type_ids = to_i64(encoding.get_type_ids());
            let seq_len = input_ids.len();

            let as_array = |values: Vec<i64>| {
                ndarray::Array2::from_shape_vec((1, seq_len), values)
                    .map_err(|e| RetrievalError::Embedding(e.to_string()))
            };
            let ids_array = as_array(input_ids)?;
            let mask_array = as_array(attention_mask.clone())?;
            let type_array = as_array(token_type_ids)?;

            let tensor_err = |e: ort::Error| RetrievalError::Embedding(e.to_string());
            let ids_tensor = TensorRef::from_array_view(&ids_array).map_err(tensor_err)?;
            let mask_tensor = TensorRef::from_array_view(&mask_array).map_err(tensor_err)?;
            let type_tensor = TensorRef::from_array_view(&type_array).map_err(tensor_err)?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| RetrievalError::Embedding("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| RetrievalError::Embedding(format!("ONNX inference failed: {e}")))?;

            // [1, seq_len, 384] token embeddings
            let (shape, token_embeddings) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RetrievalError::Embedding(format!("Output extraction: {e}")))?;

            if shape.len() != 3 || shape[2] as usize != MINILM_DIM {
                return Err(RetrievalError::Embedding(format!(
                    "Unexpected output shape: {shape:?}, expected [1, {seq_len}, {MINILM_DIM}]"
                )));
            }

            let mut pooled = vec![0.0f32; MINILM_DIM];
            let mut mask_sum = 0.0f32;
            for (token_idx, &mask) in attention_mask.iter().enumerate().take(seq_len) {
                let weight = mask as f32;
                mask_sum += weight;
                let row = &token_embeddings[token_idx * MINILM_DIM..(token_idx + 1) * MINILM_DIM];
                for (p, v) in pooled.iter_mut().zip(row) {
                    *p += v * weight;
                }
            }
            if mask_sum > 0.0 {
                pooled.iter_mut().for_each(|v| *v /= mask_sum);
            }

            l2_normalize(&mut pooled);
            Ok(pooled)
        }
    }

    impl EmbeddingModel for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            self.infer(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            texts.iter().map(|t| self.infer(t)).collect()
        }

        fn dimension(&self) -> usize {
            MINILM_DIM
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}

#[cfg(feature = "onnx-embeddings")]
pub use onnx::OnnxEmbedder;

// ═══════════════════════════════════════════════════════════
// Ollama Embedder: POST {base}/api/embed
// ═══════════════════════════════════════════════════════════

/// Embeddings from a local Ollama instance.
///
/// Blocking client: call from a blocking context (`spawn_blocking` in async code).
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    dimension: usize,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Connect and probe the model once to learn its output dimension.
    pub fn connect(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, RetrievalError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RetrievalError::ModelInit(format!("HTTP client: {e}")))?;

        let mut embedder = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            dimension: 0,
        };

        let probe = embedder.request(&["dimension probe"])?;
        embedder.dimension = probe.first().map(Vec::len).unwrap_or(0);
        if embedder.dimension == 0 {
            return Err(RetrievalError::ModelInit(format!(
                "Ollama model '{model}' returned an empty embedding"
            )));
        }

        tracing::info!(
            url = %embedder.base_url,
            model = model,
            dimension = embedder.dimension,
            "Ollama embedder connected"
        );
        Ok(embedder)
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| RetrievalError::Embedding(format!("Ollama unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .map_err(|e| RetrievalError::Embedding(format!("Invalid embed response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "Asked for {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), RetrievalError> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl EmbeddingModel for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let vector = self
            .request(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding("Empty embed response".into()))?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_idx, batch) in texts.chunks(OLLAMA_EMBED_BATCH).enumerate() {
            for vector in self.request(batch)? {
                self.check_dimension(&vector)?;
                vectors.push(vector);
            }
            tracing::debug!(
                batch = batch_idx,
                embedded = vectors.len(),
                total = texts.len(),
                "Embedding batch complete"
            );
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ═══════════════════════════════════════════════════════════
// Mock Embedder: deterministic, for tests
// ═══════════════════════════════════════════════════════════

/// Mock embedding model for testing: produces deterministic vectors.
pub struct MockEmbedder {
    dimension: usize,
    model_name: String,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(MINILM_DIM)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            model_name: "mock-embedder".to_string(),
        }
    }

    /// Same vectors under a different identifier.
    pub fn named(mut self, model_name: &str) -> Self {
        self.model_name = model_name.to_string();
        self
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(deterministic_vector(text, self.dimension))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Hash-free unit vector derived from the text bytes.
fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    let mut vec: Vec<f32> = (0..dim)
        .map(|i| {
            let byte = bytes.get(i % bytes.len().max(1)).copied().unwrap_or(0);
            (byte as f32 + i as f32) / 255.0
        })
        .collect();
    l2_normalize(&mut vec);
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_embed_returns_configured_dimension() {
        assert_eq!(MockEmbedder::new().embed("Hello").unwrap().len(), MINILM_DIM);
        let small = MockEmbedder::with_dimension(16);
        assert_eq!(small.embed("Hello").unwrap().len(), 16);
        assert_eq!(small.dimension(), 16);
    }

    #[test]
    fn mock_embed_batch_matches_single() {
        let embedder = MockEmbedder::with_dimension(32);
        let vecs = embedder.embed_batch(&["one", "two", "three"]).unwrap();
        assert_eq!(vecs.len(), 3);
        assert_eq!(vecs[1], embedder.embed("two").unwrap());
    }

    #[test]
    fn mock_embed_is_deterministic_and_distinguishes_texts() {
        let embedder = MockEmbedder::new();
        assert_eq!(embedder.embed("same").unwrap(), embedder.embed("same").unwrap());
        assert_ne!(embedder.embed("text A").unwrap(), embedder.embed("text B").unwrap());
    }

    #[test]
    fn mock_embed_is_l2_normalized() {
        let vec = MockEmbedder::new().embed("test normalization").unwrap();
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01, "got norm = {norm}");
    }

    #[test]
    fn named_mock_changes_identifier_only() {
        let plain = MockEmbedder::with_dimension(8);
        let named = MockEmbedder::with_dimension(8).named("other-model");
        assert_eq!(named.model_name(), "other-model");
        assert_eq!(plain.embed("x").unwrap(), named.embed("x").unwrap());
    }

    #[test]
    fn l2_normalize_leaves_zero_vector() {
        let mut zero = vec![0.0f32; 4];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 4]);

        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn ollama_connect_fails_when_unreachable() {
        let result = OllamaEmbedder::connect("http://127.0.0.1:1", "all-minilm", 2);
        assert!(matches!(result, Err(RetrievalError::Embedding(_))));
    }
}
