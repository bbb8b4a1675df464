use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::LlmProvider;
use super::types::{EmbedInputType, GenerateRequest};
use crate::core::config::CohereConfig;
use crate::core::errors::ApiError;

/// Upper bound on texts per `/v1/embed` call.
pub const MAX_EMBED_BATCH: usize = 96;

#[derive(Clone)]
pub struct CohereProvider {
    base_url: String,
    api_key: String,
    generation_model: Option<String>,
    embedding_model: String,
    max_tokens: u32,
    temperature: f64,
    client: Client,
}

impl CohereProvider {
    pub fn new(config: &CohereConfig, api_key: String) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            generation_model: config.generation_model.clone(),
            embedding_model: config.embedding_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }

    fn generate_body(&self, request: &GenerateRequest) -> Value {
        let mut body = json!({
            "prompt": request.prompt,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(model) = &self.generation_model {
                obj.insert("model".to_string(), json!(model));
            }
            if let Some(stop) = &request.stop {
                obj.insert("stop_sequences".to_string(), json!(stop));
            }
        }

        body
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&text),
            });
        }

        res.json().await.map_err(ApiError::internal)
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    generations: Vec<Generation>,
}

#[derive(Deserialize)]
struct Generation {
    text: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl LlmProvider for CohereProvider {
    fn name(&self) -> &str {
        "cohere"
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, ApiError> {
        let body = self.generate_body(&request);
        let payload = self.post_json("/v1/generate", &body).await?;

        let response: GenerateResponse =
            serde_json::from_value(payload).map_err(ApiError::internal)?;
        let text = response
            .generations
            .into_iter()
            .next()
            .map(|g| g.text)
            .ok_or_else(|| ApiError::Internal("Cohere returned no generations".to_string()))?;

        let text = match &request.stop {
            Some(stop) => enforce_stop_tokens(&text, stop),
            None => text,
        };
        Ok(text.trim().to_string())
    }

    async fn embed(
        &self,
        inputs: &[String],
        input_type: EmbedInputType,
    ) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut embeddings = Vec::with_capacity(inputs.len());

        for batch in inputs.chunks(MAX_EMBED_BATCH) {
            let body = json!({
                "texts": batch,
                "model": self.embedding_model,
                "input_type": input_type.as_str(),
            });
            let payload = self.post_json("/v1/embed", &body).await?;
            let response: EmbedResponse =
                serde_json::from_value(payload).map_err(ApiError::internal)?;

            if response.embeddings.len() != batch.len() {
                return Err(ApiError::Internal(format!(
                    "Cohere returned {} embeddings for {} inputs",
                    response.embeddings.len(),
                    batch.len()
                )));
            }
            embeddings.extend(response.embeddings);
        }

        Ok(embeddings)
    }
}

/// Cuts the text at the first occurrence of any stop sequence.
fn enforce_stop_tokens(text: &str, stop: &[String]) -> String {
    let cut = stop
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
        .unwrap_or(text.len());
    text[..cut].to_string()
}

fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn provider(base_url: &str) -> CohereProvider {
        let config = CohereConfig {
            base_url: base_url.to_string(),
            ..CohereConfig::default()
        };
        CohereProvider::new(&config, "test-key".to_string()).unwrap()
    }

    #[test]
    fn stop_tokens_cut_at_earliest_match() {
        let stop = vec!["\nHuman:".to_string(), "END".to_string()];
        assert_eq!(
            enforce_stop_tokens("Sure thing END\nHuman: more", &stop),
            "Sure thing "
        );
        assert_eq!(enforce_stop_tokens("no stops here", &stop), "no stops here");
    }

    #[test]
    fn upstream_message_prefers_json_message_field() {
        assert_eq!(upstream_message(r#"{"message":"invalid api token"}"#), "invalid api token");
        assert_eq!(upstream_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn generate_body_uses_configured_defaults() {
        let provider = provider("https://api.cohere.ai/");
        let body = provider.generate_body(&GenerateRequest::new("Hi"));

        assert_eq!(body["prompt"], "Hi");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.75);
        assert!(body.get("model").is_none());
        assert!(body.get("stop_sequences").is_none());
        assert_eq!(provider.base_url, "https://api.cohere.ai");
    }

    #[tokio::test]
    async fn generate_returns_first_generation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/generate")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({ "prompt": "Hello", "max_tokens": 256 })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"generations":[{"text":" Hi there!"},{"text":"ignored"}]}"#)
            .create_async()
            .await;

        let text = provider(&server.url())
            .generate(GenerateRequest::new("Hello"))
            .await
            .unwrap();

        assert_eq!(text, "Hi there!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn generate_sends_stop_sequences_and_cuts_echoed_stop() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/generate")
            .match_body(Matcher::PartialJson(json!({ "stop_sequences": ["\nQuestion:"] })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"generations":[{"text":"Doing well.\nQuestion: and you?"}]}"#)
            .create_async()
            .await;

        let request = GenerateRequest::new("Question: How are you?")
            .with_stop(vec!["\nQuestion:".to_string()]);
        let text = provider(&server.url()).generate(request).await.unwrap();

        assert_eq!(text, "Doing well.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn generate_surfaces_provider_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/generate")
            .with_status(401)
            .with_body(r#"{"message":"invalid api token"}"#)
            .create_async()
            .await;

        let err = provider(&server.url())
            .generate(GenerateRequest::new("Hello"))
            .await
            .unwrap_err();

        match err {
            ApiError::Upstream { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid api token");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn embed_sends_model_and_input_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embed")
            .match_body(Matcher::PartialJson(json!({
                "texts": ["a", "b"],
                "model": "embed-english-v2.0",
                "input_type": "search_query"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings":[[1.0,0.0],[0.0,1.0]]}"#)
            .create_async()
            .await;

        let inputs = vec!["a".to_string(), "b".to_string()];
        let embeddings = provider(&server.url())
            .embed(&inputs, EmbedInputType::SearchQuery)
            .await
            .unwrap();

        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn embed_rejects_count_mismatch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/embed")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings":[[1.0]]}"#)
            .create_async()
            .await;

        let inputs = vec!["a".to_string(), "b".to_string()];
        let result = provider(&server.url())
            .embed(&inputs, EmbedInputType::SearchDocument)
            .await;

        assert!(matches!(result, Err(ApiError::Internal(_))));
    }

    #[tokio::test]
    async fn embed_splits_large_inputs_into_batches() {
        let mut server = mockito::Server::new_async().await;
        let full_batch = format!(
            r#"{{"embeddings":[{}]}}"#,
            vec!["[0.5]"; MAX_EMBED_BATCH].join(",")
        );
        let first = server
            .mock("POST", "/v1/embed")
            .match_body(Matcher::Regex(r#""texts":\["t0","#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(full_batch)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/v1/embed")
            .match_body(Matcher::Regex(format!(r#""texts":\["t{}"\]"#, MAX_EMBED_BATCH)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings":[[0.25]]}"#)
            .expect(1)
            .create_async()
            .await;

        let inputs: Vec<String> = (0..=MAX_EMBED_BATCH).map(|i| format!("t{i}")).collect();
        let embeddings = provider(&server.url())
            .embed(&inputs, EmbedInputType::SearchDocument)
            .await
            .unwrap();

        assert_eq!(embeddings.len(), MAX_EMBED_BATCH + 1);
        assert_eq!(embeddings[MAX_EMBED_BATCH], vec![0.25]);
        first.assert_async().await;
        second.assert_async().await;
    }
}
