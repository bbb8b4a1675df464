use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::kb::Operation;
use crate::state::AppState;

pub const MESSAGE_REQUIRED: &str = "Message is required.";

pub async fn kb_answer(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle(&state, Operation::KnowledgeBaseAnswer, &body).await
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle(&state, Operation::KnowledgeBaseSearch, &body).await
}

pub async fn answer(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle(&state, Operation::ChatbotAnswer, &body).await
}

async fn handle(
    state: &AppState,
    operation: Operation,
    body: &[u8],
) -> Result<Json<Value>, ApiError> {
    let message = extract_message(body)?;
    let reply = state.kb.respond(operation, message.as_str()).await;
    Ok(Json(json!({ "message": reply })))
}

/// Pulls `message` out of a JSON object body.
///
/// A body that is not a JSON object is a server-side failure (500); a falsy
/// `message` is a client error (400). Truthy non-string values are passed on
/// and rejected by the operation's own validation.
fn extract_message(body: &[u8]) -> Result<Value, ApiError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::Internal(format!("Unreadable request body: {}", e)))?;
    let Value::Object(mut fields) = payload else {
        return Err(ApiError::Internal(
            "Request body is not a JSON object".to_string(),
        ));
    };

    let message = fields.remove("message").unwrap_or(Value::Null);
    if !is_truthy(&message) {
        return Err(ApiError::BadRequest(MESSAGE_REQUIRED.to_string()));
    }
    Ok(message)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
