//! Provider clients
//!
//! Opaque upload / generate operations, one client per provider. Clients are
//! stateless with respect to credentials: the decrypted secret is passed in
//! on every call, so a single client can serve every user.

pub mod gemini;
pub mod openai;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ProviderError;
use crate::config::AiConfig;
use crate::models::AiProvider;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

// ============================================================================
// Types
// ============================================================================

/// A local file to upload
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub path: PathBuf,
    pub mime_type: String,
    pub display_name: String,
}

/// Provider-side handle returned by an upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub remote_uri: String,
    pub remote_unique_name: String,
    pub display_name: String,
    pub expiration_time: Option<DateTime<Utc>>,
}

/// One input part of a generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A previously uploaded file
    File { uri: String, mime_type: String },
    /// Prompt text
    Text { text: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// JSON schema the provider should shape its answer after
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseSchema(pub Value);

impl ResponseSchema {
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Check a parsed response against the schema's `type`, `required`,
    /// `properties` and `items` keywords. Other keywords are not enforced.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        validate_node(&self.0, value, "$")
    }
}

fn validate_node(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let matches = match expected.to_lowercase().as_str() {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(format!("{}: expected {}", path, expected));
        }
    }

    if let (Some(required), Some(object)) = (
        schema.get("required").and_then(Value::as_array),
        value.as_object(),
    ) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("{}: missing required property '{}'", path, key));
            }
        }
    }

    if let (Some(properties), Some(object)) = (
        schema.get("properties").and_then(Value::as_object),
        value.as_object(),
    ) {
        for (key, sub_schema) in properties {
            if let Some(sub_value) = object.get(key) {
                validate_node(sub_schema, sub_value, &format!("{}.{}", path, key))?;
            }
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), value.as_array()) {
        for (idx, item) in array.iter().enumerate() {
            validate_node(items, item, &format!("{}[{}]", path, idx))?;
        }
    }

    Ok(())
}

/// Parameters of a single generation call
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub model: Option<String>,
    pub parts: Vec<ContentPart>,
    pub response_schema: Option<ResponseSchema>,
    pub system_instruction: Option<String>,
}

// ============================================================================
// Client trait
// ============================================================================

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this client talks to
    fn provider(&self) -> AiProvider;

    /// Upload a local file and return its provider-side handle
    async fn upload(&self, api_key: &str, file: &UploadSource)
        -> Result<UploadedFile, ProviderError>;

    /// Run a generation and return the response text
    async fn generate(&self, api_key: &str, params: &GenerateParams)
        -> Result<String, ProviderError>;

    /// Cheap call proving the key works. Default: accepts every key.
    async fn verify_key(&self, _api_key: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Provider clients by provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<AiProvider, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gemini and OpenAI clients with the configured models
    pub fn with_defaults(config: &AiConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GeminiClient::new(
            config.model(AiProvider::Google).unwrap_or(crate::config::DEFAULT_GEMINI_MODEL),
        )));
        registry.register(Arc::new(OpenAiClient::new(
            config.model(AiProvider::OpenAI).unwrap_or(crate::config::DEFAULT_OPENAI_MODEL),
        )));
        registry
    }

    /// Add or replace the client for its provider
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn get(&self, provider: AiProvider) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(&provider).cloned()
    }
}

/// Map an HTTP error response to a `ProviderError`
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    match status.as_u16() {
        401 | 403 => ProviderError::Unauthorized(format!("HTTP {}: {}", status, body)),
        _ => ProviderError::Api(format!("HTTP {}: {}", status, body)),
    }
}
