//! Credential resolution
//!
//! An ordered list of strategies, tried in priority order:
//!
//! ```text
//! OwnedCredential ──▶ FreeTierQuotaGate ──▶ SharedAccountCredential ──▶ SystemDefaultCredential
//!   (user's key)      (fails when the        (shared free-tier            (deployment key
//!                      lifetime cap is hit)   account's key)               from config)
//! ```
//!
//! A strategy either returns a credential, passes (`Ok(None)`), or stops the
//! chain with an error. Resolution never charges quota; the orchestrator
//! increments after a successful provider call.

use std::sync::Arc;

use async_trait::async_trait;

use super::credentials::CredentialStore;
use super::error::AiError;
use super::usage::UsageQuotaTracker;
use crate::config::AiConfig;
use crate::models::{AiProvider, CredentialSource, ResolvedCredential};

#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn try_resolve(
        &self,
        user_id: &str,
        provider: AiProvider,
    ) -> Result<Option<ResolvedCredential>, AiError>;
}

/// The requesting user's own active key
pub struct OwnedCredential {
    store: CredentialStore,
}

impl OwnedCredential {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialStrategy for OwnedCredential {
    fn name(&self) -> &'static str {
        "owned"
    }

    async fn try_resolve(
        &self,
        user_id: &str,
        provider: AiProvider,
    ) -> Result<Option<ResolvedCredential>, AiError> {
        let Some(credential) = self.store.find_active(user_id, provider).await? else {
            return Ok(None);
        };
        Ok(Some(ResolvedCredential {
            secret: self.store.decrypt_secret(&credential)?,
            credential_id: credential.id,
            provider,
            source: CredentialSource::Owned,
        }))
    }
}

/// Stops the chain once the user's free-tier counter reaches the limit.
/// Never yields a credential itself.
pub struct FreeTierQuotaGate {
    tracker: UsageQuotaTracker,
    config: Arc<AiConfig>,
}

impl FreeTierQuotaGate {
    pub fn new(tracker: UsageQuotaTracker, config: Arc<AiConfig>) -> Self {
        Self { tracker, config }
    }
}

#[async_trait]
impl CredentialStrategy for FreeTierQuotaGate {
    fn name(&self) -> &'static str {
        "quota"
    }

    async fn try_resolve(
        &self,
        user_id: &str,
        provider: AiProvider,
    ) -> Result<Option<ResolvedCredential>, AiError> {
        let counter = self.tracker.get_or_create(user_id, provider).await?;
        let limit = self.config.free_tier_limit(provider);
        if counter.count >= limit {
            log::info!(
                "[ai:resolver] User {} reached free tier limit for {} ({}/{})",
                user_id,
                provider,
                counter.count,
                limit
            );
            return Err(AiError::QuotaExceeded { provider, limit });
        }
        Ok(None)
    }
}

/// The shared free-tier account's active key
pub struct SharedAccountCredential {
    store: CredentialStore,
    config: Arc<AiConfig>,
}

impl SharedAccountCredential {
    pub fn new(store: CredentialStore, config: Arc<AiConfig>) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl CredentialStrategy for SharedAccountCredential {
    fn name(&self) -> &'static str {
        "shared"
    }

    async fn try_resolve(
        &self,
        _user_id: &str,
        provider: AiProvider,
    ) -> Result<Option<ResolvedCredential>, AiError> {
        let Some(shared_id) = self.config.shared_account_id.as_deref() else {
            return Ok(None);
        };
        let Some(credential) = self.store.find_active(shared_id, provider).await? else {
            return Ok(None);
        };
        Ok(Some(ResolvedCredential {
            secret: self.store.decrypt_secret(&credential)?,
            credential_id: credential.id,
            provider,
            source: CredentialSource::Shared,
        }))
    }
}

/// Deployment-wide default key from configuration
pub struct SystemDefaultCredential {
    config: Arc<AiConfig>,
}

impl SystemDefaultCredential {
    pub fn new(config: Arc<AiConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialStrategy for SystemDefaultCredential {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn try_resolve(
        &self,
        _user_id: &str,
        provider: AiProvider,
    ) -> Result<Option<ResolvedCredential>, AiError> {
        Ok(self.config.system_key(provider).map(|key| ResolvedCredential {
            credential_id: ResolvedCredential::system_id(provider),
            provider,
            secret: key.to_string(),
            source: CredentialSource::System,
        }))
    }
}

pub struct CredentialResolver {
    strategies: Vec<Box<dyn CredentialStrategy>>,
}

impl CredentialResolver {
    /// The standard chain: owned, quota gate, shared, system
    pub fn new(store: CredentialStore, tracker: UsageQuotaTracker, config: Arc<AiConfig>) -> Self {
        let strategies: Vec<Box<dyn CredentialStrategy>> = vec![
            Box::new(OwnedCredential::new(store.clone())),
            Box::new(FreeTierQuotaGate::new(tracker, config.clone())),
            Box::new(SharedAccountCredential::new(store, config.clone())),
            Box::new(SystemDefaultCredential::new(config)),
        ];
        Self::with_strategies(strategies)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn CredentialStrategy>>) -> Self {
        Self { strategies }
    }

    pub async fn resolve(
        &self,
        user_id: &str,
        provider: AiProvider,
    ) -> Result<ResolvedCredential, AiError> {
        for strategy in &self.strategies {
            if let Some(credential) = strategy.try_resolve(user_id, provider).await? {
                log::debug!(
                    "[ai:resolver] Resolved {} credential {} for user {} via {}",
                    provider,
                    credential.credential_id,
                    user_id,
                    strategy.name()
                );
                return Ok(credential);
            }
        }

        log::warn!(
            "[ai:resolver] No {} credential available for user {}",
            provider,
            user_id
        );
        Err(AiError::NoCredentialAvailable { provider })
    }
}
