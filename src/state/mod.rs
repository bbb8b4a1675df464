use std::sync::Arc;

use crate::core::config::{AppConfig, AppPaths};
use crate::kb::KnowledgeBase;
use crate::llm::{CohereProvider, LlmProvider};
use crate::rag::{RagStore, SqliteRagStore};

pub mod error;

pub use error::InitializationError;

/// Global application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub llm: Arc<dyn LlmProvider>,
    pub store: Arc<dyn RagStore>,
    pub kb: KnowledgeBase,
}

impl AppState {
    /// Builds the provider client and opens the persisted index.
    ///
    /// Fails when no API key is configured or the index cannot be opened; the
    /// server must not start in either case.
    pub async fn initialize(
        paths: &AppPaths,
        config: AppConfig,
    ) -> Result<Arc<Self>, InitializationError> {
        let (llm, store) = build_backends(paths, &config).await?;

        match store.embedding_model().await {
            Ok(Some(model)) if model != llm.embedding_model() => tracing::warn!(
                "Index was built with {} but {} is configured; re-run ingest",
                model,
                llm.embedding_model()
            ),
            Ok(_) => {}
            Err(e) => return Err(InitializationError::Rag(e)),
        }

        Ok(Self::from_parts(config, llm, store))
    }

    pub fn from_parts(
        config: AppConfig,
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn RagStore>,
    ) -> Arc<Self> {
        let kb = KnowledgeBase::new(llm.clone(), store.clone(), config.retrieval.top_k);
        Arc::new(AppState {
            config,
            llm,
            store,
            kb,
        })
    }
}

/// Provider client and vector index, shared by the server and the ingest command.
pub async fn build_backends(
    paths: &AppPaths,
    config: &AppConfig,
) -> Result<(Arc<dyn LlmProvider>, Arc<dyn RagStore>), InitializationError> {
    let api_key = config
        .cohere
        .resolved_api_key()
        .ok_or(InitializationError::MissingApiKey)?;
    let llm = CohereProvider::new(&config.cohere, api_key).map_err(InitializationError::Llm)?;

    let persist_directory = paths.resolve_data_path(&config.retrieval.persist_directory);
    let store = SqliteRagStore::open(&persist_directory)
        .await
        .map_err(InitializationError::Rag)?;
    tracing::info!("Loaded vector index from {}", persist_directory.display());

    Ok((Arc::new(llm), Arc::new(store)))
}
