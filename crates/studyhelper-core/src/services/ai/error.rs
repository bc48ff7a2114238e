//! Error taxonomy for the AI resource management core

use thiserror::Error;

use crate::models::AiProvider;

/// Errors surfaced by credential resolution, file caching and generation
///
/// Every variant is scoped to a single request. Nothing here is retried
/// internally; `is_retryable` tells the caller which ones are worth retrying.
#[derive(Error, Debug)]
pub enum AiError {
    /// No credential at any fallback tier
    #[error("No {provider} API key available. Please add your own API key.")]
    NoCredentialAvailable { provider: AiProvider },

    /// Free-tier lifetime limit reached
    #[error("You have reached your free tier limit ({limit}) for {provider}. Please add your own API key.")]
    QuotaExceeded { provider: AiProvider, limit: i64 },

    /// The user may not read the referenced file
    #[error("You don't have access to file with ID {file_id}")]
    AccessDenied { file_id: String },

    /// The referenced file does not exist
    #[error("File with ID {file_id} not found")]
    FileNotFound { file_id: String },

    /// Provider upload failed; existing cache state is untouched
    #[error("Failed to upload file to {provider}: {message}")]
    UploadFailed { provider: AiProvider, message: String },

    /// Provider inference failed or timed out
    #[error("Failed to generate content with {provider}: {message}")]
    GenerationFailed { provider: AiProvider, message: String },

    /// No client is registered for the provider
    #[error("Provider not supported: {0}")]
    UnsupportedProvider(AiProvider),

    /// Stored secret could not be decoded
    #[error("Secret codec error: {0}")]
    Secret(String),

    /// Persistence failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AiError {
    /// Provider failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::UploadFailed { .. } | AiError::GenerationFailed { .. }
        )
    }

    /// Failures caused by the request itself rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AiError::AccessDenied { .. } | AiError::FileNotFound { .. } | AiError::QuotaExceeded { .. }
        )
    }
}

/// Errors reported by a provider client
#[derive(Error, Debug)]
pub enum ProviderError {
    /// API key rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// API returned an error status
    #[error("API error: {0}")]
    Api(String),

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Network request failed
    #[error("Network error: {0}")]
    Network(String),

    /// Reading the local file failed
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            ProviderError::Network("Connection failed".to_string())
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else if err.is_status() {
            match err.status() {
                Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                    ProviderError::Unauthorized("Invalid or expired API key".to_string())
                }
                Some(status) => ProviderError::Api(format!("HTTP {}", status)),
                None => ProviderError::Network(err.to_string()),
            }
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let upload = AiError::UploadFailed {
            provider: AiProvider::Google,
            message: "503".to_string(),
        };
        let generate = AiError::GenerationFailed {
            provider: AiProvider::OpenAI,
            message: "timeout".to_string(),
        };
        assert!(upload.is_retryable());
        assert!(generate.is_retryable());
        assert!(!AiError::NoCredentialAvailable { provider: AiProvider::Google }.is_retryable());
        assert!(!AiError::QuotaExceeded { provider: AiProvider::Google, limit: 10 }.is_retryable());
    }

    #[test]
    fn test_client_error_kinds() {
        assert!(AiError::AccessDenied { file_id: "f".to_string() }.is_client_error());
        assert!(AiError::FileNotFound { file_id: "f".to_string() }.is_client_error());
        assert!(AiError::QuotaExceeded { provider: AiProvider::Google, limit: 1 }.is_client_error());
        assert!(!AiError::NoCredentialAvailable { provider: AiProvider::Google }.is_client_error());
    }

    #[test]
    fn test_quota_message_guides_user() {
        let err = AiError::QuotaExceeded {
            provider: AiProvider::Google,
            limit: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("free tier limit (10)"));
        assert!(msg.contains("add your own API key"));
    }
}
