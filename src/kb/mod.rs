//! The three question-answering operations behind the HTTP routes.
//!
//! Each operation has a strict form returning `Result`, and `respond` wraps
//! them so callers always get a displayable string: failures are logged and
//! replaced by a fixed fallback message.

use std::sync::Arc;

use crate::core::errors::ApiError;
use crate::llm::{GenerateRequest, LlmProvider, PromptTemplate};
use crate::rag::{RagStore, RetrievalQa, StoredChunk};

pub const NO_ANSWER: &str = "No answer found.";
pub const NO_SOURCES: &str = "No sources found.";
pub const INVALID_INPUT: &str = "Invalid input. Please provide a non-empty string.";

/// Keeps the model from writing the user's next turn.
const CHATBOT_STOP: &str = "\nQuestion:";

pub const CHATBOT_PROMPT: PromptTemplate = PromptTemplate::new(
    "Question: {question}\nAnswer as if you are a chatbot helping a human user.",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    KnowledgeBaseAnswer,
    KnowledgeBaseSearch,
    ChatbotAnswer,
}

impl Operation {
    pub fn fallback(&self) -> &'static str {
        match self {
            Operation::KnowledgeBaseAnswer => "An error occurred while retrieving the answer.",
            Operation::KnowledgeBaseSearch => {
                "An error occurred while searching the knowledge base."
            }
            Operation::ChatbotAnswer => "An error occurred while generating the chatbot response.",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Operation::KnowledgeBaseAnswer => "answering from knowledge base",
            Operation::KnowledgeBaseSearch => "searching the knowledge base",
            Operation::ChatbotAnswer => "answering as chatbot",
        }
    }
}

#[derive(Clone)]
pub struct KnowledgeBase {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn RagStore>,
    qa: RetrievalQa,
}

impl KnowledgeBase {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn RagStore>, top_k: usize) -> Self {
        let qa = RetrievalQa::new(llm.clone(), store.clone(), top_k);
        Self { llm, store, qa }
    }

    pub fn store(&self) -> &Arc<dyn RagStore> {
        &self.store
    }

    /// Runs `operation` and never fails: errors become the operation's fallback text.
    pub async fn respond(&self, operation: Operation, message: Option<&str>) -> String {
        let result = match validate_message(message) {
            Ok(message) => match operation {
                Operation::KnowledgeBaseAnswer => self.answer_from_knowledgebase(message).await,
                Operation::KnowledgeBaseSearch => self.search_knowledgebase(message).await,
                Operation::ChatbotAnswer => self.answer_as_chatbot(message).await,
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Error {}: {}", operation.label(), e);
                operation.fallback().to_string()
            }
        }
    }

    pub async fn answer_from_knowledgebase(&self, message: &str) -> Result<String, ApiError> {
        let message = validate_message(Some(message))?;
        let outcome = self.qa.run(message).await?;
        Ok(outcome.result.unwrap_or_else(|| NO_ANSWER.to_string()))
    }

    pub async fn search_knowledgebase(&self, message: &str) -> Result<String, ApiError> {
        let message = validate_message(Some(message))?;
        let documents = self.qa.retrieve(message).await?;
        Ok(format_sources(&documents))
    }

    pub async fn answer_as_chatbot(&self, message: &str) -> Result<String, ApiError> {
        let message = validate_message(Some(message))?;
        let prompt = CHATBOT_PROMPT.format(&[("question", message)])?;
        let request = GenerateRequest::new(prompt).with_stop(vec![CHATBOT_STOP.to_string()]);
        self.llm.generate(request).await
    }
}

/// `Source {n}` headers followed by the chunk text, numbered from 1.
pub fn format_sources(documents: &[StoredChunk]) -> String {
    if documents.is_empty() {
        return NO_SOURCES.to_string();
    }

    documents
        .iter()
        .enumerate()
        .map(|(idx, doc)| format!("Source {}\n{}\n", idx + 1, doc.content))
        .collect()
}

fn validate_message(message: Option<&str>) -> Result<&str, ApiError> {
    match message {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(ApiError::BadRequest(INVALID_INPUT.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EmbedInputType;
    use crate::rag::SqliteRagStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Embeds by keyword so retrieval is predictable; echoes prompts back.
    #[derive(Default)]
    struct EchoLlm {
        fail: AtomicBool,
        prompts: Mutex<Vec<String>>,
        stops: Mutex<Vec<Option<Vec<String>>>>,
    }

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        fn embedding_model(&self) -> &str {
            "echo-embed"
        }

        async fn generate(&self, request: GenerateRequest) -> Result<String, ApiError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Upstream {
                    status: 500,
                    message: "provider down".to_string(),
                });
            }
            self.prompts.lock().unwrap().push(request.prompt);
            self.stops.lock().unwrap().push(request.stop);
            Ok("generated".to_string())
        }

        async fn embed(
            &self,
            inputs: &[String],
            _input_type: EmbedInputType,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.contains("rust") as u8 as f32,
                        t.contains("python") as u8 as f32,
                        0.1,
                    ]
                })
                .collect())
        }
    }

    fn doc(id: &str, content: &str) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            source: "kb.txt".to_string(),
            metadata: None,
        }
    }

    async fn knowledge_base(
        docs: Vec<(StoredChunk, Vec<f32>)>,
    ) -> (tempfile::TempDir, Arc<EchoLlm>, KnowledgeBase) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteRagStore::open(dir.path()).await.unwrap());
        store.insert_batch(docs).await.unwrap();
        let llm = Arc::new(EchoLlm::default());
        let kb = KnowledgeBase::new(llm.clone(), store, 4);
        (dir, llm, kb)
    }

    #[test]
    fn sources_are_numbered_from_one() {
        let formatted = format_sources(&[doc("a", "alpha"), doc("b", "beta")]);
        assert_eq!(formatted, "Source 1\nalpha\nSource 2\nbeta\n");
    }

    #[test]
    fn no_sources_message_when_empty() {
        assert_eq!(format_sources(&[]), NO_SOURCES);
    }

    #[tokio::test]
    async fn search_returns_best_match_first() {
        let (_dir, _llm, kb) = knowledge_base(vec![
            (doc("p", "Python is dynamic."), vec![0.0, 1.0, 0.1]),
            (doc("r", "Rust has ownership."), vec![1.0, 0.0, 0.1]),
        ])
        .await;

        let sources = kb.search_knowledgebase("Tell me about Rust").await.unwrap();
        assert!(sources.starts_with("Source 1\nRust has ownership.\n"));
        assert!(sources.contains("Source 2\nPython is dynamic.\n"));
    }

    #[tokio::test]
    async fn kb_answer_uses_retrieved_context() {
        let (_dir, llm, kb) =
            knowledge_base(vec![(doc("r", "Rust has ownership."), vec![1.0, 0.0, 0.1])]).await;

        let answer = kb.answer_from_knowledgebase("What about Rust?").await.unwrap();

        assert_eq!(answer, "generated");
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Rust has ownership."));
    }

    #[tokio::test]
    async fn kb_answer_on_empty_index_reports_no_answer() {
        let (_dir, _llm, kb) = knowledge_base(Vec::new()).await;
        assert_eq!(kb.answer_from_knowledgebase("anything").await.unwrap(), NO_ANSWER);
        assert_eq!(kb.search_knowledgebase("anything").await.unwrap(), NO_SOURCES);
    }

    #[tokio::test]
    async fn chatbot_prompt_wraps_question() {
        let (_dir, llm, kb) = knowledge_base(Vec::new()).await;

        kb.answer_as_chatbot("How are you?").await.unwrap();

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(
            prompts[0],
            "Question: How are you?\nAnswer as if you are a chatbot helping a human user."
        );
        assert_eq!(
            llm.stops.lock().unwrap()[0],
            Some(vec!["\nQuestion:".to_string()])
        );
    }

    #[tokio::test]
    async fn respond_replaces_errors_with_fallbacks() {
        let (_dir, llm, kb) =
            knowledge_base(vec![(doc("r", "Rust has ownership."), vec![1.0, 0.0, 0.1])]).await;
        llm.fail.store(true, Ordering::SeqCst);

        assert_eq!(
            kb.respond(Operation::ChatbotAnswer, Some("hi")).await,
            Operation::ChatbotAnswer.fallback()
        );
        assert_eq!(
            kb.respond(Operation::KnowledgeBaseAnswer, Some("rust")).await,
            Operation::KnowledgeBaseAnswer.fallback()
        );
        // Search never calls the generator.
        assert!(kb
            .respond(Operation::KnowledgeBaseSearch, Some("rust"))
            .await
            .starts_with("Source 1\n"));
    }

    #[tokio::test]
    async fn respond_rejects_missing_or_empty_input() {
        let (_dir, llm, kb) = knowledge_base(Vec::new()).await;

        for op in [
            Operation::KnowledgeBaseAnswer,
            Operation::KnowledgeBaseSearch,
            Operation::ChatbotAnswer,
        ] {
            assert_eq!(kb.respond(op, None).await, op.fallback());
            assert_eq!(kb.respond(op, Some("")).await, op.fallback());
        }
        assert!(llm.prompts.lock().unwrap().is_empty());
    }
}
