//! Abstract interface for the persisted vector index.
//!
//! The knowledge base reads through this trait; ingestion writes through it.
//! The primary implementation is `SqliteRagStore` in the `sqlite` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A stored document chunk with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Unique chunk identifier.
    pub chunk_id: String,
    /// The text content of the chunk.
    pub content: String,
    /// Source identifier (usually the ingested file path).
    pub source: String,
    /// Optional metadata (JSON).
    pub metadata: Option<serde_json::Value>,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Similarity score (higher = better).
    pub score: f32,
}

#[async_trait]
pub trait RagStore: Send + Sync {
    /// Insert multiple chunks with their embeddings in one transaction.
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Search for chunks similar to the query embedding, best first.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    /// Swap every chunk that came from `source` for `items` in one transaction.
    /// Returns how many old chunks were removed.
    async fn replace_source(
        &self,
        source: &str,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<usize, ApiError>;

    /// Total chunk count.
    async fn count(&self) -> Result<usize, ApiError>;

    /// Embedding model the stored vectors were built with, if recorded.
    async fn embedding_model(&self) -> Result<Option<String>, ApiError>;

    /// Clear all chunks and record the model future vectors will come from.
    ///
    /// Used when the embedding model changes and all vectors are invalidated.
    async fn reindex_with_model(&self, embedding_model: &str) -> Result<(), ApiError>;
}
