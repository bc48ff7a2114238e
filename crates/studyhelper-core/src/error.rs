//! Unified error handling for studyhelper-core

use thiserror::Error;

use crate::services::ai::AiError;

/// Core error type for studyhelper-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for studyhelper-core
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AiProvider;

    #[test]
    fn test_error_display() {
        let err = Error::config("STUDYHELPER_FREE_TIER_GOOGLE_LIMIT must be an integer");
        assert_eq!(
            err.to_string(),
            "Configuration error: STUDYHELPER_FREE_TIER_GOOGLE_LIMIT must be an integer"
        );
    }

    #[test]
    fn test_ai_error_is_transparent() {
        let err: Error = AiError::NoCredentialAvailable {
            provider: AiProvider::Google,
        }
        .into();
        assert!(err.to_string().contains("No google API key available"));
    }
}
