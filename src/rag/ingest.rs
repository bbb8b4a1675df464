//! Populates the vector index from files on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::splitter::{strip_html_tags, TextChunk, TextSplitter};
use super::store::{RagStore, StoredChunk};
use crate::core::config::IngestConfig;
use crate::core::errors::ApiError;
use crate::llm::{EmbedInputType, LlmProvider};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_written: usize,
}

pub struct Ingestor {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn RagStore>,
    splitter: TextSplitter,
    batch_size: usize,
    extensions: Vec<String>,
}

impl Ingestor {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn RagStore>, config: &IngestConfig) -> Self {
        Self {
            llm,
            store,
            splitter: TextSplitter::new(config.chunk_size, config.chunk_overlap),
            batch_size: config.batch_size.max(1),
            extensions: config
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> Result<IngestReport, ApiError> {
        self.ensure_embedding_model().await?;

        let mut report = IngestReport::default();
        for path in self.collect_files(paths) {
            report.files_seen += 1;
            match self.ingest_file(&path).await? {
                Some(written) => {
                    report.files_indexed += 1;
                    report.chunks_written += written;
                }
                None => report.files_skipped += 1,
            }
        }

        tracing::info!(
            "Ingestion finished: {} files seen, {} indexed, {} skipped, {} chunks",
            report.files_seen,
            report.files_indexed,
            report.files_skipped,
            report.chunks_written
        );
        Ok(report)
    }

    fn collect_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in paths {
            for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() && self.accepts(entry.path()) => {
                        files.push(entry.into_path());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Skipping unreadable path under {}: {}", root.display(), e);
                    }
                }
            }
        }
        files
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Vectors from different embedding models are not comparable, so a model
    /// change wipes the index before anything new is written.
    async fn ensure_embedding_model(&self) -> Result<(), ApiError> {
        let configured = self.llm.embedding_model();
        let stored = self.store.embedding_model().await?;
        if stored.as_deref() == Some(configured) {
            return Ok(());
        }

        match stored {
            Some(previous) => tracing::warn!(
                "Embedding model changed from {} to {}; clearing the index",
                previous,
                configured
            ),
            None => tracing::info!("Recording embedding model {} for the index", configured),
        }
        self.store.reindex_with_model(configured).await
    }

    /// Returns `None` when the file was skipped.
    async fn ingest_file(&self, path: &Path) -> Result<Option<usize>, ApiError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        let is_html = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
            .unwrap_or(false);
        let text = if is_html { strip_html_tags(&raw) } else { raw };

        let source = path.display().to_string();
        let chunks = self.splitter.split(&text, &source);
        if chunks.is_empty() {
            tracing::debug!("Skipping {}: no text", source);
            return Ok(None);
        }

        // Nothing is written until every chunk has an embedding.
        let ingested_at = chrono::Utc::now().to_rfc3339();
        let mut items = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self
                .llm
                .embed(&texts, EmbedInputType::SearchDocument)
                .await?;

            items.extend(
                batch
                    .iter()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| (to_stored_chunk(chunk, &ingested_at), embedding)),
            );
        }

        let removed = self.store.replace_source(&source, items).await?;
        if removed > 0 {
            tracing::debug!("Replaced {} old chunks from {}", removed, source);
        }

        tracing::info!("Indexed {} ({} chunks)", source, chunks.len());
        Ok(Some(chunks.len()))
    }
}

fn to_stored_chunk(chunk: &TextChunk, ingested_at: &str) -> StoredChunk {
    StoredChunk {
        chunk_id: chunk_id(chunk),
        content: chunk.text.clone(),
        source: chunk.source.clone(),
        metadata: Some(json!({
            "start_offset": chunk.start_offset,
            "chunk_index": chunk.chunk_index,
            "ingested_at": ingested_at,
        })),
    }
}

fn chunk_id(chunk: &TextChunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.chunk_index.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.text.as_bytes());
    hex::encode(hasher.finalize())
}
