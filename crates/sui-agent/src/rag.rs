//! Document retrieval: a vector index over chunks of the project documentation.
//!
//! The index is built once on first start and persisted; later starts load it
//! from disk. When there is nothing to index the service runs without retrieval.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::providers::embedding::Embedder;

pub mod index;
pub mod loader;
pub mod splitter;

pub use index::{IndexedChunk, ScoredChunk, VectorIndex};
pub use loader::{load_documents, Document};
pub use splitter::TextSplitter;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid splitter settings: chunk overlap {overlap} is larger than chunk size {size}")]
    InvalidChunking { size: usize, overlap: usize },

    #[error("Index I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index file is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub docs_dir: PathBuf,
    pub index_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
}

/// Similarity search over the persisted index
pub struct Retriever {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// The `top_k` chunks most similar to the query, best first
    pub async fn retrieve(&self, query: &str) -> Result<Vec<IndexedChunk>, RagError> {
        let query_vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

        Ok(self
            .index
            .search(&query_vector, self.top_k)
            .into_iter()
            .map(|scored| scored.chunk.clone())
            .collect())
    }

    /// Load the persisted index, or build and persist it from the docs directory.
    ///
    /// Returns `Ok(None)` when there is no index and no documents to build one from.
    pub async fn load_or_build(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Option<Self>, RagError> {
        if VectorIndex::exists(&config.index_dir) {
            tracing::info!(
                "[RAG] Loading existing index from '{}'...",
                config.index_dir.display()
            );
            match VectorIndex::load(&config.index_dir) {
                Ok(index) => {
                    tracing::info!("[RAG] Index loaded with {} chunks.", index.len());
                    return Ok(Some(Self::new(index, embedder, config.top_k)));
                }
                Err(e) => tracing::warn!("[RAG] Existing index is unusable, rebuilding: {}", e),
            }
        }

        tracing::info!(
            "[RAG] No existing index found. Building new index from '{}'...",
            config.docs_dir.display()
        );
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;
        let docs_dir = config.docs_dir.clone();
        let documents = tokio::task::spawn_blocking(move || load_documents(&docs_dir))
            .await
            .map_err(|e| RagError::Internal(e.to_string()))?;

        if documents.is_empty() {
            tracing::warn!("[RAG] No documents found to build index.");
            return Ok(None);
        }

        tracing::info!(
            "[RAG] Loaded {} documents. Splitting into chunks...",
            documents.len()
        );
        let pieces: Vec<(String, String)> = documents
            .iter()
            .flat_map(|doc| {
                splitter
                    .split_text(&doc.text)
                    .into_iter()
                    .map(move |text| (doc.source.clone(), text))
            })
            .collect();
        if pieces.is_empty() {
            tracing::warn!("[RAG] Documents contained no text to index.");
            return Ok(None);
        }

        tracing::info!(
            "[RAG] Split into {} chunks. Creating embeddings...",
            pieces.len()
        );
        let texts: Vec<String> = pieces.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = embedder
            .embed(&texts)
            .await
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;
        if embeddings.len() != pieces.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                pieces.len(),
                embeddings.len()
            )));
        }

        let chunks = pieces
            .into_iter()
            .zip(embeddings)
            .map(|((source, text), embedding)| IndexedChunk {
                source,
                text,
                embedding,
            })
            .collect();
        let index = VectorIndex::new(chunks);

        index.save(&config.index_dir)?;
        tracing::info!("[RAG] Index saved to '{}'.", config.index_dir.display());

        Ok(Some(Self::new(index, embedder, config.top_k)))
    }
}
