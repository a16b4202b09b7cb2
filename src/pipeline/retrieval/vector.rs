use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::index::FlatL2Index;
use super::persist::{
    cache_complete, cleanup_orphaned_staging, corpus_digest, digest_hex, read_index, read_npy,
    stage_and_swap, write_index, write_npy,
};
use super::types::{EmbeddingModel, Retriever};
use super::RetrievalError;
use crate::config::{DOCUMENTS_FILE, EMBEDDINGS_FILE, INDEX_FILE, MODEL_NAME_FILE};
use crate::models::CodedEntry;

/// Dense nearest-neighbour retrieval over vocabulary descriptions.
///
/// Row `i` of the index is the embedding of `entries[i].description`.
pub struct VectorRetriever {
    entries: Vec<CodedEntry>,
    index: FlatL2Index,
    embedder: Arc<dyn EmbeddingModel>,
}

impl VectorRetriever {
    /// Embed every description and index the vectors.
    pub fn build(
        entries: Vec<CodedEntry>,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<Self, RetrievalError> {
        if entries.is_empty() {
            return Err(RetrievalError::EmptyCorpus);
        }

        let started = std::time::Instant::now();
        let texts: Vec<&str> = entries.iter().map(|e| e.description.as_str()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != entries.len() {
            return Err(RetrievalError::Embedding(format!(
                "Embedded {} of {} descriptions",
                vectors.len(),
                entries.len()
            )));
        }

        let mut index = FlatL2Index::new(embedder.dimension());
        for vector in &vectors {
            index.add(vector)?;
        }

        tracing::info!(
            entries = entries.len(),
            dimension = index.dimension(),
            model = embedder.model_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Vector retriever built"
        );

        Ok(Self {
            entries,
            index,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn entries(&self) -> &[CodedEntry] {
        &self.entries
    }

    /// Nearest entries to an already-computed query embedding.
    pub fn retrieve_by_vector(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<CodedEntry>, RetrievalError> {
        Ok(self
            .index
            .search(query, k)?
            .into_iter()
            .map(|(position, _)| self.entries[position].clone())
            .collect())
    }

    /// Write the four cache files into `dir`, replacing any previous set.
    pub fn save(&self, dir: &Path) -> Result<(), RetrievalError> {
        let digest = corpus_digest(&self.entries);
        stage_and_swap(dir, |staging| {
            let documents = serde_json::to_vec(&self.entries)?;
            fs::write(staging.join(DOCUMENTS_FILE), documents)?;
            fs::write(staging.join(MODEL_NAME_FILE), self.embedder.model_name())?;
            write_index(&staging.join(INDEX_FILE), &self.index, &digest)?;
            write_npy(
                &staging.join(EMBEDDINGS_FILE),
                self.index.len(),
                self.index.dimension(),
                self.index.as_flat(),
            )
        })?;

        tracing::info!(
            dir = %dir.display(),
            entries = self.entries.len(),
            digest = %digest_hex(&digest),
            "Vector retriever saved"
        );
        Ok(())
    }

    /// Restore a saved retriever without re-embedding the corpus.
    ///
    /// `embedder` must carry the model name recorded in the cache.
    pub fn load(dir: &Path, embedder: Arc<dyn EmbeddingModel>) -> Result<Self, RetrievalError> {
        let saved_model = fs::read_to_string(dir.join(MODEL_NAME_FILE))?;
        let saved_model = saved_model.trim();
        if saved_model != embedder.model_name() {
            return Err(RetrievalError::ConfigMismatch {
                saved: saved_model.to_string(),
                configured: embedder.model_name().to_string(),
            });
        }

        let entries: Vec<CodedEntry> =
            serde_json::from_slice(&fs::read(dir.join(DOCUMENTS_FILE))?)?;
        let (index, recorded_digest) = read_index(&dir.join(INDEX_FILE))?;
        let (rows, cols, embeddings) = read_npy(&dir.join(EMBEDDINGS_FILE))?;

        if entries.is_empty() {
            return Err(RetrievalError::CorruptCache("documents.json is empty".into()));
        }
        if recorded_digest != corpus_digest(&entries) {
            return Err(RetrievalError::CorruptCache(
                "index was built over a different corpus".into(),
            ));
        }
        if index.len() != entries.len() || rows != entries.len() {
            return Err(RetrievalError::CorruptCache(format!(
                "{} documents, {} indexed vectors, {rows} embedding rows",
                entries.len(),
                index.len()
            )));
        }
        if cols != index.dimension() || index.as_flat() != embeddings.as_slice() {
            return Err(RetrievalError::CorruptCache(
                "index vectors disagree with embeddings.npy".into(),
            ));
        }
        if index.dimension() != embedder.dimension() {
            return Err(RetrievalError::DimensionMismatch {
                expected: embedder.dimension(),
                actual: index.dimension(),
            });
        }

        tracing::info!(
            dir = %dir.display(),
            entries = entries.len(),
            model = saved_model,
            "Vector retriever loaded from cache"
        );

        Ok(Self {
            entries,
            index,
            embedder,
        })
    }

    /// Load the cache in `dir` when it is complete and matches `entries`,
    /// otherwise build from scratch and save.
    ///
    /// A model mismatch is fatal. Any other unusable cache is rebuilt.
    pub fn load_or_build(
        dir: &Path,
        entries: Vec<CodedEntry>,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<Self, RetrievalError> {
        cleanup_orphaned_staging(dir);

        if cache_complete(dir) {
            match Self::load(dir, Arc::clone(&embedder)) {
                Ok(retriever) if retriever.entries == entries => return Ok(retriever),
                Ok(stale) => tracing::warn!(
                    dir = %dir.display(),
                    cached = stale.entries.len(),
                    vocabulary = entries.len(),
                    "Cached corpus differs from vocabulary, rebuilding"
                ),
                Err(e @ RetrievalError::ConfigMismatch { .. }) => return Err(e),
                Err(e) => tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Retriever cache unusable, rebuilding"
                ),
            }
        } else {
            tracing::info!(dir = %dir.display(), "No complete retriever cache, building");
        }

        let retriever = Self::build(entries, embedder)?;
        retriever.save(dir)?;
        Ok(retriever)
    }
}

impl Retriever for VectorRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<CodedEntry>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query)?;
        self.retrieve_by_vector(&embedding, k)
    }

    fn strategy(&self) -> &'static str {
        "vector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::retrieval::embedder::MockEmbedder;

    const DIM: usize = 16;

    fn corpus() -> Vec<CodedEntry> {
        vec![
            CodedEntry::new("J18", "Pneumonia, unspecified organism", false),
            CodedEntry::new("J18.9", "Pneumonia, unspecified organism", true),
            CodedEntry::new("I10", "Essential (primary) hypertension", true),
            CodedEntry::new("E11.9", "Type 2 diabetes mellitus without complications", true),
            CodedEntry::new("R05.9", "Cough, unspecified", true),
        ]
    }

    fn mock() -> Arc<dyn EmbeddingModel> {
        Arc::new(MockEmbedder::with_dimension(DIM))
    }

    fn codes(entries: &[CodedEntry]) -> Vec<String> {
        entries.iter().map(|e| e.code.clone()).collect()
    }

    #[test]
    fn exact_description_is_nearest() {
        let retriever = VectorRetriever::build(corpus(), mock()).unwrap();
        let hits = retriever.retrieve("Essential (primary) hypertension", 1).unwrap();
        assert_eq!(codes(&hits), vec!["I10"]);
    }

    #[test]
    fn identical_descriptions_keep_corpus_order() {
        let retriever = VectorRetriever::build(corpus(), mock()).unwrap();
        let hits = retriever.retrieve("Pneumonia, unspecified organism", 2).unwrap();
        assert_eq!(codes(&hits), vec!["J18", "J18.9"]);
    }

    #[test]
    fn k_is_clamped_to_corpus() {
        let retriever = VectorRetriever::build(corpus(), mock()).unwrap();
        assert_eq!(retriever.retrieve("cough", 50).unwrap().len(), 5);
        assert!(retriever.retrieve("cough", 0).unwrap().is_empty());
    }

    #[test]
    fn empty_corpus_rejected() {
        assert!(matches!(
            VectorRetriever::build(Vec::new(), mock()),
            Err(RetrievalError::EmptyCorpus)
        ));
    }

    #[test]
    fn save_then_load_returns_identical_neighbours() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        let built = VectorRetriever::build(corpus(), mock()).unwrap();
        built.save(&cache).unwrap();

        let loaded = VectorRetriever::load(&cache, mock()).unwrap();
        for probe in ["persistent cough", "high blood pressure", "diabetes"] {
            assert_eq!(
                codes(&built.retrieve(probe, 3).unwrap()),
                codes(&loaded.retrieve(probe, 3).unwrap())
            );
        }
        assert_eq!(loaded.entries(), built.entries());
    }

    #[test]
    fn saved_documents_use_is_billable_field() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        VectorRetriever::build(corpus(), mock()).unwrap().save(&cache).unwrap();

        let docs: serde_json::Value =
            serde_json::from_slice(&fs::read(cache.join(DOCUMENTS_FILE)).unwrap()).unwrap();
        assert_eq!(docs[1]["code"], "J18.9");
        assert_eq!(docs[1]["is_billable"], true);
        assert_eq!(
            fs::read_to_string(cache.join(MODEL_NAME_FILE)).unwrap(),
            "mock-embedder"
        );
    }

    #[test]
    fn load_with_other_model_is_config_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        VectorRetriever::build(corpus(), mock()).unwrap().save(&cache).unwrap();

        let other = Arc::new(MockEmbedder::with_dimension(DIM).named("other-model"));
        let err = VectorRetriever::load(&cache, other).err().unwrap();
        assert!(matches!(
            err,
            RetrievalError::ConfigMismatch { ref saved, ref configured }
                if saved == "mock-embedder" && configured == "other-model"
        ));
    }

    #[test]
    fn load_or_build_fails_fast_on_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        VectorRetriever::build(corpus(), mock()).unwrap().save(&cache).unwrap();

        let other = Arc::new(MockEmbedder::with_dimension(DIM).named("other-model"));
        assert!(matches!(
            VectorRetriever::load_or_build(&cache, corpus(), other),
            Err(RetrievalError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn load_or_build_rebuilds_partial_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        VectorRetriever::build(corpus(), mock()).unwrap().save(&cache).unwrap();
        fs::remove_file(cache.join(EMBEDDINGS_FILE)).unwrap();

        let retriever = VectorRetriever::load_or_build(&cache, corpus(), mock()).unwrap();
        assert_eq!(retriever.len(), 5);
        assert!(cache_complete(&cache));
    }

    #[test]
    fn load_or_build_rebuilds_corrupt_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        VectorRetriever::build(corpus(), mock()).unwrap().save(&cache).unwrap();
        fs::write(cache.join(INDEX_FILE), b"garbage").unwrap();

        let retriever = VectorRetriever::load_or_build(&cache, corpus(), mock()).unwrap();
        assert_eq!(retriever.retrieve("Cough, unspecified", 1).unwrap()[0].code, "R05.9");
        assert!(VectorRetriever::load(&cache, mock()).is_ok());
    }

    #[test]
    fn load_detects_mismatched_documents() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        VectorRetriever::build(corpus(), mock()).unwrap().save(&cache).unwrap();

        let mut tampered = corpus();
        tampered[2].description = "Hypertension".into();
        fs::write(cache.join(DOCUMENTS_FILE), serde_json::to_vec(&tampered).unwrap()).unwrap();

        assert!(matches!(
            VectorRetriever::load(&cache, mock()),
            Err(RetrievalError::CorruptCache(_))
        ));
    }

    #[test]
    fn load_or_build_rebuilds_when_vocabulary_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("index");
        VectorRetriever::build(corpus(), mock()).unwrap().save(&cache).unwrap();

        let mut grown = corpus();
        grown.push(CodedEntry::new("R50.9", "Fever, unspecified", true));
        let retriever = VectorRetriever::load_or_build(&cache, grown.clone(), mock()).unwrap();
        assert_eq!(retriever.entries(), grown.as_slice());

        let reloaded = VectorRetriever::load(&cache, mock()).unwrap();
        assert_eq!(reloaded.len(), 6);
    }
}
