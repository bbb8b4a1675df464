use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(cohere) = expect_optional_object(root, "cohere")? {
        validate_optional_string_field(cohere, "cohere.api_key", "api_key")?;
        validate_optional_string_field(cohere, "cohere.base_url", "base_url")?;
        validate_optional_string_field(cohere, "cohere.generation_model", "generation_model")?;
        validate_optional_string_field(cohere, "cohere.embedding_model", "embedding_model")?;
        validate_u64_field(cohere, "cohere.max_tokens", "max_tokens", 1, 100_000)?;
        validate_f64_field(cohere, "cohere.temperature", "temperature", 0.0, 5.0)?;
        validate_u64_field(cohere, "cohere.timeout_secs", "timeout_secs", 1, 86_400)?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_optional_string_field(
            retrieval,
            "retrieval.persist_directory",
            "persist_directory",
        )?;
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 100)?;
    }

    if let Some(ingest) = expect_optional_object(root, "ingest")? {
        validate_u64_field(ingest, "ingest.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(ingest, "ingest.chunk_overlap", "chunk_overlap", 0, 1_000_000)?;
        validate_u64_field(ingest, "ingest.batch_size", "batch_size", 1, 96)?;
        validate_string_array_field(ingest, "ingest.extensions", "extensions")?;

        let chunk_size = ingest.get("chunk_size").and_then(Value::as_u64).unwrap_or(1000);
        let chunk_overlap = ingest
            .get("chunk_overlap")
            .and_then(Value::as_u64)
            .unwrap_or(200);
        if chunk_overlap >= chunk_size {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at 'ingest.chunk_overlap': must be smaller than chunk_size ({})",
                chunk_size
            )));
        }
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(err: ApiError) -> String {
        match err {
            ApiError::BadRequest(msg) => msg,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_config_is_valid() {
        assert!(validate_config(&json!({})).is_ok());
    }

    #[test]
    fn rejects_non_object_root() {
        let err = validate_config(&json!(["nope"])).unwrap_err();
        assert_eq!(message(err), "Invalid config at 'root': expected object");
    }

    #[test]
    fn rejects_out_of_range_top_k() {
        let err = validate_config(&json!({ "retrieval": { "top_k": 0 } })).unwrap_err();
        assert_eq!(
            message(err),
            "Invalid config at 'retrieval.top_k': must be between 1 and 100"
        );
    }

    #[test]
    fn rejects_wrong_types() {
        let err = validate_config(&json!({ "cohere": { "temperature": "hot" } })).unwrap_err();
        assert_eq!(
            message(err),
            "Invalid config at 'cohere.temperature': expected number"
        );

        let err = validate_config(&json!({ "server": { "cors_allowed_origins": [""] } }))
            .unwrap_err();
        assert!(message(err).contains("server.cors_allowed_origins[0]"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = validate_config(&json!({
            "ingest": { "chunk_size": 100, "chunk_overlap": 100 }
        }))
        .unwrap_err();
        assert!(message(err).contains("ingest.chunk_overlap"));

        assert!(validate_config(&json!({
            "ingest": { "chunk_size": 100, "chunk_overlap": 10 }
        }))
        .is_ok());
    }
}
