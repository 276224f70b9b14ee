use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;

use super::embedding::Embedder;

/// Name of the model `FastEmbedder` runs, as recorded in logs
pub const LOCAL_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Embeddings computed in-process with all-MiniLM-L6-v2 (384 dimensions).
///
/// The model is downloaded on first use and cached; after that no network
/// access or API key is needed.
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
}

impl FastEmbedder {
    /// Load the model, downloading it into `cache_dir` if it isn't there yet.
    ///
    /// Blocking; call from `spawn_blocking` inside a runtime.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        tracing::info!("Loading local embedding model {}", LOCAL_EMBEDDING_MODEL);
        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
        if let Some(cache_dir) = cache_dir {
            options = options.with_cache_dir(cache_dir);
        }

        let model = TextEmbedding::try_new(options)
            .map_err(|e| anyhow!("Failed to initialize embedding model: {}", e))?;
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = self.model.clone();
        let texts = texts.to_vec();
        let expected = texts.len();
        let vectors = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| anyhow!("Embedding task failed: {}", e))?
            .map_err(|e| anyhow!("Failed to generate embeddings: {}", e))?;

        if vectors.len() != expected {
            return Err(anyhow!(
                "Expected {} embeddings, got {}",
                expected,
                vectors.len()
            ));
        }
        Ok(vectors)
    }
}
