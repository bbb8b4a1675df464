pub mod cohere;
pub mod prompt;
pub mod provider;
pub mod types;

pub use cohere::CohereProvider;
pub use prompt::PromptTemplate;
pub use provider::LlmProvider;
pub use types::{EmbedInputType, GenerateRequest};
