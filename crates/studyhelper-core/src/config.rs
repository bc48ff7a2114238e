//! AI configuration
//!
//! Free-tier limits, the shared free-tier account, system default keys and
//! provider model names. Loaded from environment variables with defaults.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::AiProvider;
use crate::services::ai::secret::MIN_SECRET_KEY_LEN;

pub const DEFAULT_FREE_TIER_LIMIT: i64 = 10;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct AiConfig {
    free_tier_limits: HashMap<AiProvider, i64>,
    /// User id of the platform's shared free-tier account
    pub shared_account_id: Option<String>,
    system_keys: HashMap<AiProvider, String>,
    models: HashMap<AiProvider, String>,
    /// Default timeout for a single generation call
    pub request_timeout: Duration,
    secret_key: Option<String>,
}

impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("free_tier_limits", &self.free_tier_limits)
            .field("shared_account_id", &self.shared_account_id)
            .field("system_keys", &self.system_keys.keys().collect::<Vec<_>>())
            .field("models", &self.models)
            .field("request_timeout", &self.request_timeout)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        let mut free_tier_limits = HashMap::new();
        free_tier_limits.insert(AiProvider::Google, DEFAULT_FREE_TIER_LIMIT);
        free_tier_limits.insert(AiProvider::OpenAI, DEFAULT_FREE_TIER_LIMIT);
        free_tier_limits.insert(AiProvider::Other, 0);

        let mut models = HashMap::new();
        models.insert(AiProvider::Google, DEFAULT_GEMINI_MODEL.to_string());
        models.insert(AiProvider::OpenAI, DEFAULT_OPENAI_MODEL.to_string());

        Self {
            free_tier_limits,
            shared_account_id: None,
            system_keys: HashMap::new(),
            models,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            secret_key: None,
        }
    }
}

impl AiConfig {
    /// Load configuration from the environment
    ///
    /// - `STUDYHELPER_FREE_TIER_{GOOGLE,OPENAI,OTHER}_LIMIT`
    /// - `STUDYHELPER_FREE_USER_ID`
    /// - `GEMINI_API_KEY`, `OPENAI_API_KEY`
    /// - `STUDYHELPER_GEMINI_MODEL`, `STUDYHELPER_OPENAI_MODEL`
    /// - `STUDYHELPER_REQUEST_TIMEOUT_SECS`
    /// - `STUDYHELPER_SECRET_KEY` (credential encryption, at least 16 characters)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        for provider in AiProvider::ALL {
            let var = format!(
                "STUDYHELPER_FREE_TIER_{}_LIMIT",
                provider.as_str().to_uppercase()
            );
            if let Some(value) = non_empty_var(&var) {
                let limit: i64 = value
                    .parse()
                    .map_err(|_| Error::config(format!("{} must be an integer, got {:?}", var, value)))?;
                if limit < 0 {
                    return Err(Error::config(format!("{} must not be negative", var)));
                }
                config.free_tier_limits.insert(provider, limit);
            }
        }

        config.shared_account_id = non_empty_var("STUDYHELPER_FREE_USER_ID");

        if let Some(key) = non_empty_var("GEMINI_API_KEY") {
            config.system_keys.insert(AiProvider::Google, key);
        }
        if let Some(key) = non_empty_var("OPENAI_API_KEY") {
            config.system_keys.insert(AiProvider::OpenAI, key);
        }

        if let Some(model) = non_empty_var("STUDYHELPER_GEMINI_MODEL") {
            config.models.insert(AiProvider::Google, model);
        }
        if let Some(model) = non_empty_var("STUDYHELPER_OPENAI_MODEL") {
            config.models.insert(AiProvider::OpenAI, model);
        }

        if let Some(value) = non_empty_var("STUDYHELPER_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| {
                Error::config(format!(
                    "STUDYHELPER_REQUEST_TIMEOUT_SECS must be a positive integer, got {:?}",
                    value
                ))
            })?;
            config.request_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(secret) = non_empty_var("STUDYHELPER_SECRET_KEY") {
            if secret.len() < MIN_SECRET_KEY_LEN {
                return Err(Error::config(format!(
                    "STUDYHELPER_SECRET_KEY must be at least {} characters",
                    MIN_SECRET_KEY_LEN
                )));
            }
            config.secret_key = Some(secret);
        }

        log::debug!(
            "[config] Loaded AI config: shared_account={}, system_keys={:?}",
            config.shared_account_id.is_some(),
            config.system_keys.keys().collect::<Vec<_>>()
        );

        Ok(config)
    }

    /// Lifetime free-tier limit for a provider (0 when unset)
    pub fn free_tier_limit(&self, provider: AiProvider) -> i64 {
        self.free_tier_limits.get(&provider).copied().unwrap_or(0)
    }

    /// System-wide default key for a provider, if configured
    pub fn system_key(&self, provider: AiProvider) -> Option<&str> {
        self.system_keys.get(&provider).map(String::as_str)
    }

    /// Model used for generation with a provider
    pub fn model(&self, provider: AiProvider) -> Option<&str> {
        self.models.get(&provider).map(String::as_str)
    }

    /// Deployment secret used to encrypt stored credentials
    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    pub fn with_free_tier_limit(mut self, provider: AiProvider, limit: i64) -> Self {
        self.free_tier_limits.insert(provider, limit);
        self
    }

    pub fn with_shared_account(mut self, user_id: impl Into<String>) -> Self {
        self.shared_account_id = Some(user_id.into());
        self
    }

    pub fn with_system_key(mut self, provider: AiProvider, key: impl Into<String>) -> Self {
        self.system_keys.insert(provider, key.into());
        self
    }

    pub fn with_model(mut self, provider: AiProvider, model: impl Into<String>) -> Self {
        self.models.insert(provider, model.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_secret_key(mut self, secret: impl Into<String>) -> Self {
        self.secret_key = Some(secret.into());
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
