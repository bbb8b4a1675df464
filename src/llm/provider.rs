use async_trait::async_trait;

use super::types::{EmbedInputType, GenerateRequest};
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name (e.g. "cohere")
    fn name(&self) -> &str;

    /// name of the model used by `embed`, recorded alongside the vector index
    fn embedding_model(&self) -> &str;

    /// text completion (non-streaming)
    async fn generate(&self, request: GenerateRequest) -> Result<String, ApiError>;

    /// one embedding per input, in input order
    async fn embed(
        &self,
        inputs: &[String],
        input_type: EmbedInputType,
    ) -> Result<Vec<Vec<f32>>, ApiError>;
}
