use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::types::AppConfig;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "access_key",
    "access_token",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 2] = ["max_tokens", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        resolve_config_path(&self.paths, env::var("KBCHAT_CONFIG_PATH").ok())
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Raw merged tree of `config.yml` and `secrets.yaml`.
    pub fn load_config(&self) -> Result<Value, ApiError> {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        Ok(deep_merge(&public_config, &secrets_config))
    }

    /// Loads, validates and types the configuration, then applies environment overrides.
    pub fn resolve(&self) -> Result<AppConfig, ApiError> {
        let merged = self.load_config()?;
        let mut config = parse_config(&merged)?;
        apply_env_overrides(&mut config, |key| env::var(key).ok());
        validate_config(&serde_json::to_value(&config).map_err(ApiError::internal)?)?;
        Ok(config)
    }

    pub fn redacted(&self, config: &AppConfig) -> Value {
        let value = serde_json::to_value(config).unwrap_or(Value::Null);
        redact_sensitive_values(&value)
    }
}

pub fn parse_config(merged: &Value) -> Result<AppConfig, ApiError> {
    validate_config(merged)?;
    serde_json::from_value(merged.clone())
        .map_err(|e| ApiError::BadRequest(format!("Invalid config: {}", e)))
}

pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(key) = non_empty("COHERE_API_KEY") {
        config.cohere.api_key = Some(key);
    }
    if let Some(base_url) = non_empty("COHERE_BASE_URL") {
        config.cohere.base_url = base_url;
    }
    if let Some(port) = non_empty("PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) if port > 0 => config.server.port = port,
            _ => tracing::warn!(
                "Ignoring PORT={:?}; keeping port {}",
                port,
                config.server.port
            ),
        }
    }
    if let Some(dir) = non_empty("KBCHAT_PERSIST_DIR") {
        config.retrieval.persist_directory = PathBuf::from(dir);
    }
}

/// `KBCHAT_CONFIG_PATH` wins, then `config.yml` in the data dir, then the project root.
fn resolve_config_path(paths: &AppPaths, override_path: Option<String>) -> PathBuf {
    if let Some(path) = override_path.filter(|path| !path.trim().is_empty()) {
        return PathBuf::from(path);
    }

    let user_config = paths.user_data_dir.join("config.yml");
    if user_config.exists() {
        return user_config;
    }

    paths.project_root.join("config.yml")
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Map::new()),
            Err(e) => {
                tracing::warn!("Ignoring unparsable config file {}: {}", path.display(), e);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}
