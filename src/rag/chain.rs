//! Retrieval question answering with a refine chain.
//!
//! The question is embedded, the `top_k` nearest chunks are fetched, and the
//! answer is built one document at a time: the first document produces an
//! initial answer, every following document gets a chance to refine it.

use std::sync::Arc;

use super::store::{RagStore, StoredChunk};
use crate::core::errors::ApiError;
use crate::llm::{EmbedInputType, GenerateRequest, LlmProvider, PromptTemplate};

pub const QUESTION_PROMPT: PromptTemplate = PromptTemplate::new(
    "Context information is below.\n\
     ---------------------\n\
     {context}\n\
     ---------------------\n\
     Given the context information and not prior knowledge, answer the question: {question}\n",
);

pub const REFINE_PROMPT: PromptTemplate = PromptTemplate::new(
    "The original question is as follows: {question}\n\
     We have provided an existing answer: {existing_answer}\n\
     We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
     ------------\n\
     {context}\n\
     ------------\n\
     Given the new context, refine the original answer to better answer the question. \
     If the context isn't useful, return the original answer.",
);

#[derive(Debug, Clone)]
pub struct QaOutcome {
    /// `None` when nothing was retrieved to answer from.
    pub result: Option<String>,
    pub source_documents: Vec<StoredChunk>,
}

#[derive(Clone)]
pub struct RetrievalQa {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn RagStore>,
    top_k: usize,
}

impl RetrievalQa {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn RagStore>, top_k: usize) -> Self {
        Self {
            llm,
            store,
            top_k: top_k.max(1),
        }
    }

    /// Nearest chunks to `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<StoredChunk>, ApiError> {
        let embeddings = self
            .llm
            .embed(&[query.to_string()], EmbedInputType::SearchQuery)
            .await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("No embedding returned for query".to_string()))?;

        let results = self.store.search(&query_embedding, self.top_k).await?;
        tracing::debug!("Retrieved {} chunks", results.len());
        Ok(results.into_iter().map(|r| r.chunk).collect())
    }

    pub async fn run(&self, query: &str) -> Result<QaOutcome, ApiError> {
        let source_documents = self.retrieve(query).await?;
        let result = self.refine(query, &source_documents).await?;
        Ok(QaOutcome {
            result,
            source_documents,
        })
    }

    async fn refine(
        &self,
        question: &str,
        documents: &[StoredChunk],
    ) -> Result<Option<String>, ApiError> {
        let mut answer: Option<String> = None;

        for document in documents {
            let prompt = match &answer {
                None => QUESTION_PROMPT.format(&[
                    ("context", document.content.as_str()),
                    ("question", question),
                ])?,
                Some(existing) => REFINE_PROMPT.format(&[
                    ("question", question),
                    ("existing_answer", existing.as_str()),
                    ("context", document.content.as_str()),
                ])?,
            };
            answer = Some(self.llm.generate(GenerateRequest::new(prompt)).await?);
        }

        Ok(answer)
    }
}
