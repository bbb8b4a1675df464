use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cohere: CohereConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CohereConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Leave unset to let the provider pick its default generation model.
    pub generation_model: Option<String>,
    pub embedding_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
}

impl Default for CohereConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.cohere.ai".to_string(),
            generation_model: None,
            embedding_model: "embed-english-v2.0".to_string(),
            max_tokens: 256,
            temperature: 0.75,
            timeout_secs: 60,
        }
    }
}

impl CohereConfig {
    /// The configured key with surrounding whitespace removed; blank counts as unset.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub persist_directory: PathBuf,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            persist_directory: PathBuf::from("db"),
            top_k: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            batch_size: 96,
            extensions: ["txt", "md", "markdown", "html", "htm"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}
