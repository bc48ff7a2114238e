//! Content generation orchestration
//!
//! One call runs `Validating -> ResolvingCredential -> Uploading(0..n) ->
//! Generating -> Succeeded | Failed`. Side effects happen only after the
//! step that justifies them: uploads are cached as they complete, quota is
//! charged only after the provider returned a response.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::credentials::CredentialStore;
use super::error::AiError;
use super::file_cache::ExternalFileCache;
use super::file_store::FileStore;
use super::provider::{ContentPart, GenerateParams, ProviderRegistry, ResponseSchema};
use super::resolver::CredentialResolver;
use super::usage::UsageQuotaTracker;
use crate::config::AiConfig;
use crate::models::{AiProvider, CredentialSource, StoredFile};

// ============================================================================
// Request / response types
// ============================================================================

/// A single generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: String,
    pub prompt: String,
    /// Local file ids, in the order they are sent to the provider
    pub file_ids: Vec<String>,
    pub provider: AiProvider,
    pub response_schema: Option<ResponseSchema>,
    pub system_instruction: Option<String>,
    /// Overrides the provider client's default model
    pub model: Option<String>,
    /// Overrides the configured request timeout
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    pub fn new(user_id: impl Into<String>, provider: AiProvider, prompt: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            prompt: prompt.into(),
            file_ids: Vec::new(),
            provider,
            response_schema: None,
            system_instruction: None,
            model: None,
            timeout: None,
        }
    }

    pub fn with_files<I, S>(mut self, file_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_ids = file_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What the provider produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationOutput {
    /// No schema was requested
    Text { text: String },
    /// The response parsed and matched the requested schema
    Structured { value: Value },
    /// A schema was requested but the response did not satisfy it
    RawFallback { raw: String, reason: String },
}

impl GenerationOutput {
    /// Response text as the provider returned it (structured values re-serialized)
    pub fn raw_text(&self) -> String {
        match self {
            GenerationOutput::Text { text } => text.clone(),
            GenerationOutput::Structured { value } => value.to_string(),
            GenerationOutput::RawFallback { raw, .. } => raw.clone(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, GenerationOutput::RawFallback { .. })
    }
}

/// Typed counterpart of `GenerationOutput` for `generate_typed`
#[derive(Debug, Clone, PartialEq)]
pub enum TypedOutput<T> {
    Parsed(T),
    RawFallback { raw: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub output: GenerationOutput,
    pub provider: AiProvider,
    pub credential_source: CredentialSource,
    /// Remote handles sent to the provider, in file order
    pub remote_files: Vec<String>,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct ContentGenerationOrchestrator {
    resolver: CredentialResolver,
    cache: ExternalFileCache,
    tracker: UsageQuotaTracker,
    store: CredentialStore,
    files: Arc<dyn FileStore>,
    providers: ProviderRegistry,
    config: Arc<AiConfig>,
}

impl ContentGenerationOrchestrator {
    pub fn new(
        resolver: CredentialResolver,
        cache: ExternalFileCache,
        tracker: UsageQuotaTracker,
        store: CredentialStore,
        files: Arc<dyn FileStore>,
        providers: ProviderRegistry,
        config: Arc<AiConfig>,
    ) -> Self {
        Self {
            resolver,
            cache,
            tracker,
            store,
            files,
            providers,
            config,
        }
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, AiError> {
        let provider = request.provider;
        let client = self
            .providers
            .get(provider)
            .ok_or(AiError::UnsupportedProvider(provider))?;

        // Validating: nothing below runs unless every file is readable
        let files = self.validate_files(&request.user_id, &request.file_ids).await?;

        // ResolvingCredential
        let credential = self.resolver.resolve(&request.user_id, provider).await?;
        log::info!(
            "[ai:generate] User {} generating with {} ({} credential, {} files)",
            request.user_id,
            provider,
            credential.source,
            files.len()
        );

        // Uploading
        let mut parts = Vec::with_capacity(files.len() + 1);
        let mut remote_files = Vec::with_capacity(files.len());
        for file in &files {
            let entry = self
                .cache
                .get_or_upload(file, &credential, client.as_ref())
                .await?;
            remote_files.push(entry.remote_uri.clone());
            parts.push(ContentPart::File {
                uri: entry.remote_uri,
                mime_type: file.mime_type.clone(),
            });
        }
        parts.push(ContentPart::text(request.prompt.as_str()));

        // Generating
        let params = GenerateParams {
            model: request.model.clone(),
            parts,
            response_schema: request.response_schema.clone(),
            system_instruction: request.system_instruction.clone(),
        };
        let timeout = request.timeout.unwrap_or(self.config.request_timeout);
        let text = match tokio::time::timeout(timeout, client.generate(&credential.secret, &params)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                log::warn!("[ai:generate] {} generation failed: {}", provider, e);
                return Err(AiError::GenerationFailed {
                    provider,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                log::warn!(
                    "[ai:generate] {} generation timed out after {:?}",
                    provider,
                    timeout
                );
                return Err(AiError::GenerationFailed {
                    provider,
                    message: format!("timed out after {}s", timeout.as_secs_f64()),
                });
            }
        };

        // Succeeded. Bookkeeping failures past this point are logged, never returned
        if credential.source.counts_against_quota() {
            if let Err(e) = self.tracker.increment(&request.user_id, provider).await {
                log::error!(
                    "[ai:generate] Failed to record free tier usage for user {} on {}: {}",
                    request.user_id,
                    provider,
                    e
                );
            }
        }
        if credential.is_persisted() {
            if let Err(e) = self.store.touch_last_used(&credential.credential_id).await {
                log::warn!(
                    "[ai:generate] Failed to update last used time of credential {}: {}",
                    credential.credential_id,
                    e
                );
            }
        }

        let output = parse_output(text, request.response_schema.as_ref());
        if let GenerationOutput::RawFallback { reason, .. } = &output {
            log::warn!(
                "[ai:generate] Structured response did not match schema, returning raw text: {}",
                reason
            );
        }

        Ok(GenerationResult {
            output,
            provider,
            credential_source: credential.source,
            remote_files,
        })
    }

    /// Generate and deserialize the structured result into `T`, falling back
    /// to the raw text when either the schema check or deserialization fails.
    pub async fn generate_typed<T: DeserializeOwned>(
        &self,
        request: GenerationRequest,
    ) -> Result<TypedOutput<T>, AiError> {
        let result = self.generate(request).await?;
        Ok(match result.output {
            GenerationOutput::Structured { value } => {
                let raw = value.to_string();
                match serde_json::from_value::<T>(value) {
                    Ok(parsed) => TypedOutput::Parsed(parsed),
                    Err(e) => TypedOutput::RawFallback {
                        raw,
                        reason: e.to_string(),
                    },
                }
            }
            GenerationOutput::Text { text } => match serde_json::from_str::<T>(strip_code_fence(&text)) {
                Ok(parsed) => TypedOutput::Parsed(parsed),
                Err(e) => TypedOutput::RawFallback {
                    raw: text,
                    reason: e.to_string(),
                },
            },
            GenerationOutput::RawFallback { raw, reason } => TypedOutput::RawFallback { raw, reason },
        })
    }

    async fn validate_files(
        &self,
        user_id: &str,
        file_ids: &[String],
    ) -> Result<Vec<StoredFile>, AiError> {
        let mut files = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            let file = self
                .files
                .get_file(file_id)
                .await?
                .ok_or_else(|| AiError::FileNotFound {
                    file_id: file_id.clone(),
                })?;
            if !self.files.has_read_access(user_id, file_id).await? {
                log::info!(
                    "[ai:generate] User {} denied access to file {}",
                    user_id,
                    file_id
                );
                return Err(AiError::AccessDenied {
                    file_id: file_id.clone(),
                });
            }
            files.push(file);
        }
        Ok(files)
    }
}

/// Models sometimes wrap JSON in a markdown fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_output(text: String, schema: Option<&ResponseSchema>) -> GenerationOutput {
    let Some(schema) = schema else {
        return GenerationOutput::Text { text };
    };

    let value = match serde_json::from_str::<Value>(strip_code_fence(&text)) {
        Ok(value) => value,
        Err(e) => {
            return GenerationOutput::RawFallback {
                raw: text,
                reason: format!("invalid JSON: {}", e),
            }
        }
    };

    match schema.validate(&value) {
        Ok(()) => GenerationOutput::Structured { value },
        Err(reason) => GenerationOutput::RawFallback { raw: text, reason },
    }
}
