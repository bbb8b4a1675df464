//! Knowledge-base retrieval.
//!
//! This module provides:
//! - `RagStore` / `SqliteRagStore`: the persisted vector index
//! - `Ingestor`: splits and embeds files into the index
//! - `RetrievalQa`: retrieval followed by a refine chain over the hits

mod chain;
mod ingest;
mod splitter;
mod sqlite;
mod store;

pub use chain::{QaOutcome, RetrievalQa, QUESTION_PROMPT, REFINE_PROMPT};
pub use ingest::{IngestReport, Ingestor};
pub use splitter::{strip_html_tags, TextChunk, TextSplitter};
pub use sqlite::SqliteRagStore;
pub use store::{ChunkSearchResult, RagStore, StoredChunk};
