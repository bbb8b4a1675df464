use thiserror::Error;

use crate::core::errors::ApiError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("COHERE_API_KEY is missing. Ensure it is set in the environment variables.")]
    MissingApiKey,

    #[error("Failed to load configuration: {0}")]
    Config(#[source] ApiError),

    #[error("Failed to initialize the QA system: {0}")]
    Rag(#[source] ApiError),

    #[error("Failed to initialize LLM provider: {0}")]
    Llm(#[source] ApiError),
}
