//! SQLite-backed vector index.
//!
//! Chunk text and metadata live in SQLite; search is brute-force cosine
//! similarity over every stored embedding.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::store::{ChunkSearchResult, RagStore, StoredChunk};
use crate::core::errors::ApiError;

const DB_FILE_NAME: &str = "rag.db";

pub struct SqliteRagStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteRagStore {
    /// Opens (or creates) the index inside `persist_directory`.
    pub async fn open(persist_directory: &Path) -> Result<Self, ApiError> {
        std::fs::create_dir_all(persist_directory).map_err(|e| {
            ApiError::Internal(format!(
                "Failed to create persist directory {}: {}",
                persist_directory.display(),
                e
            ))
        })?;
        Self::with_path(persist_directory.join(DB_FILE_NAME)).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        tracing::debug!("Opened vector index at {}", store.db_path.display());
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_chunks (
                chunk_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                metadata TEXT DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_source ON rag_chunks(source)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Sqlite>,
        items: &[(StoredChunk, Vec<f32>)],
    ) -> Result<(), ApiError> {
        for (chunk, embedding) in items {
            let blob = Self::serialize_embedding(embedding);
            let metadata_str = chunk
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default())
                .unwrap_or_else(|| "{}".to_string());

            sqlx::query(
                "INSERT OR REPLACE INTO rag_chunks (chunk_id, content, source, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut **tx)
            .await
            .map_err(ApiError::internal)?;
        }
        Ok(())
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<Value>(&metadata_str).ok();

        StoredChunk {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            source: row.get("source"),
            metadata,
        }
    }
}

#[async_trait]
impl RagStore for SqliteRagStore {
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        Self::insert_in(&mut tx, &items).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        let rows = sqlx::query(
            "SELECT chunk_id, content, source, metadata, embedding
             FROM rag_chunks
             ORDER BY created_at, chunk_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<ChunkSearchResult> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored_emb = Self::deserialize_embedding(&embedding_bytes);
                let score = Self::cosine_similarity(query_embedding, &stored_emb);

                Some(ChunkSearchResult {
                    chunk: Self::row_to_chunk(row),
                    score,
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    async fn replace_source(
        &self,
        source: &str,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<usize, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let removed = sqlx::query("DELETE FROM rag_chunks WHERE source = ?1")
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?
            .rows_affected() as usize;
        Self::insert_in(&mut tx, &items).await?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(count as usize)
    }

    async fn embedding_model(&self) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar("SELECT value FROM rag_meta WHERE key = 'embedding_model'")
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn reindex_with_model(&self, embedding_model: &str) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM rag_chunks")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO rag_meta (key, value, updated_at)
             VALUES ('embedding_model', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(embedding_model)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, SqliteRagStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRagStore::open(&dir.path().join("db")).await.unwrap();
        (dir, store)
    }

    fn make_chunk(id: &str, content: &str, source: &str) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            metadata: Some(serde_json::json!({ "start_offset": 0 })),
        }
    }

    #[tokio::test]
    async fn open_creates_db_inside_persist_directory() {
        let (dir, store) = test_store().await;
        assert_eq!(store.db_path(), dir.path().join("db").join("rag.db"));
        assert!(store.db_path().exists());
    }

    #[tokio::test]
    async fn insert_and_search_ranks_by_cosine() {
        let (_dir, store) = test_store().await;

        store
            .insert_batch(vec![
                (make_chunk("c1", "about cats", "a.txt"), vec![1.0, 0.0]),
                (make_chunk("c2", "about dogs", "a.txt"), vec![0.0, 1.0]),
                (make_chunk("c3", "cats and dogs", "b.txt"), vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let results = store.search(&[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
        assert!(results[0].score > results[1].score);
        assert_eq!(
            results[0].chunk.metadata.as_ref().unwrap()["start_offset"],
            0
        );
    }

    #[tokio::test]
    async fn search_on_empty_store_returns_nothing() {
        let (_dir, store) = test_store().await;
        assert!(store.search(&[1.0], 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_source_only_touches_that_source() {
        let (_dir, store) = test_store().await;

        store
            .insert_batch(vec![
                (make_chunk("c1", "one", "a.txt"), vec![1.0]),
                (make_chunk("c2", "two", "a.txt"), vec![1.0]),
                (make_chunk("c3", "three", "b.txt"), vec![1.0]),
            ])
            .await
            .unwrap();

        let removed = store
            .replace_source("a.txt", vec![(make_chunk("c4", "four", "a.txt"), vec![1.0])])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        let mut contents: Vec<String> = store
            .search(&[1.0], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.content)
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["four", "three"]);
    }

    #[tokio::test]
    async fn reindex_with_model_clears_chunks_and_records_model() {
        let (_dir, store) = test_store().await;
        assert_eq!(store.embedding_model().await.unwrap(), None);

        store
            .insert_batch(vec![(make_chunk("c1", "data", "doc"), vec![1.0])])
            .await
            .unwrap();

        store.reindex_with_model("embed-english-v3.0").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(
            store.embedding_model().await.unwrap().as_deref(),
            Some("embed-english-v3.0")
        );
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let persist = dir.path().join("db");
        {
            let store = SqliteRagStore::open(&persist).await.unwrap();
            store
                .insert_batch(vec![(make_chunk("c1", "persisted", "doc"), vec![1.0])])
                .await
                .unwrap();
            store.pool.close().await;
        }

        let reopened = SqliteRagStore::open(&persist).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
