use serde::{Deserialize, Serialize};

/// A single completion request against the generation endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Generation ends at the first of these; any echoed stop text is cut.
    pub stop: Option<Vec<String>>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            stop: None,
        }
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// How an embedding will be used. Asymmetric embedding models encode
/// documents and queries differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedInputType {
    SearchDocument,
    SearchQuery,
}

impl EmbedInputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedInputType::SearchDocument => "search_document",
            EmbedInputType::SearchQuery => "search_query",
        }
    }
}
