//! Data models for the Study Helper AI core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Provider
// ============================================================================

/// Generative-AI provider a credential is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    /// Google Gemini
    Google,
    /// OpenAI
    #[serde(rename = "openai")]
    OpenAI,
    /// Any other provider (no built-in client)
    Other,
}

impl AiProvider {
    /// All known providers, in display order
    pub const ALL: [AiProvider; 3] = [AiProvider::Google, AiProvider::OpenAI, AiProvider::Other];

    /// Stored name used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::Google => "google",
            AiProvider::OpenAI => "openai",
            AiProvider::Other => "other",
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AiProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" | "gemini" => Ok(AiProvider::Google),
            "openai" | "open_ai" => Ok(AiProvider::OpenAI),
            "other" => Ok(AiProvider::Other),
            _ => Err(format!(
                "Unknown provider: {}. Valid options are: google, openai, other",
                s
            )),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Stored API key row. `encrypted_secret` is ciphertext produced by a
/// `SecretCodec`; plaintext never touches this struct.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub encrypted_secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Parsed provider, `None` for rows written with an unknown name
    pub fn provider_kind(&self) -> Option<AiProvider> {
        self.provider.parse().ok()
    }
}

/// Credential response (without the secret)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<Credential> for CredentialResponse {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            user_id: credential.user_id,
            provider: credential.provider,
            is_active: credential.is_active,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
            last_used_at: credential.last_used_at,
        }
    }
}

/// Partial update of a credential. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub provider: Option<AiProvider>,
    /// New plaintext secret (rotation)
    pub secret: Option<String>,
    pub is_active: Option<bool>,
}

/// Which fallback tier produced a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// The requesting user's own key
    Owned,
    /// The shared free-tier account's key
    Shared,
    /// Deployment-wide default key from configuration
    System,
}

impl CredentialSource {
    /// Whether calls served by this source are charged to the free-tier quota
    pub fn counts_against_quota(&self) -> bool {
        !matches!(self, CredentialSource::Owned)
    }
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Owned => write!(f, "owned"),
            CredentialSource::Shared => write!(f, "shared"),
            CredentialSource::System => write!(f, "system"),
        }
    }
}

/// A credential ready to hand to a provider client
#[derive(Clone)]
pub struct ResolvedCredential {
    /// Row id, or `system:<provider>` for the configured default key
    pub credential_id: String,
    pub provider: AiProvider,
    /// Decrypted secret
    pub secret: String,
    pub source: CredentialSource,
}

impl ResolvedCredential {
    /// Synthetic id used for the system default credential of a provider
    pub fn system_id(provider: AiProvider) -> String {
        format!("system:{}", provider)
    }

    /// Whether this credential has a row in `credentials`
    pub fn is_persisted(&self) -> bool {
        self.source != CredentialSource::System
    }
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("credential_id", &self.credential_id)
            .field("provider", &self.provider)
            .field("secret", &"****")
            .field("source", &self.source)
            .finish()
    }
}

// ============================================================================
// Free-tier quota
// ============================================================================

/// Lifetime free-tier usage for a (user, provider) pair
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuotaCounter {
    pub user_id: String,
    pub provider: String,
    pub count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Free-tier usage of one provider, with the configured limit applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider: AiProvider,
    pub count: i64,
    pub limit: i64,
    pub remaining: i64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ProviderUsage {
    pub fn new(provider: AiProvider, count: i64, limit: i64, last_used_at: Option<DateTime<Utc>>) -> Self {
        Self {
            provider,
            count,
            limit,
            remaining: (limit - count).max(0),
            last_used_at,
        }
    }
}

/// Usage across all providers for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub user_id: String,
    pub providers: Vec<ProviderUsage>,
    pub has_own_keys: bool,
}

// ============================================================================
// Files and provider-side cache
// ============================================================================

/// A locally stored file as described by the file store
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredFile {
    pub id: String,
    pub owner_id: String,
    pub path: String,
    pub mime_type: String,
    pub display_name: String,
}

/// Mapping of (local file, credential) to a provider-side file handle
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CacheEntry {
    pub id: String,
    pub file_id: String,
    pub credential_id: String,
    pub remote_uri: String,
    pub remote_display_name: String,
    pub remote_unique_name: String,
    pub expiration_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is valid when it never expires or expires after `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiration_time {
            Some(expires) => expires > now,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(expiration_time: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry {
            id: "entry-1".to_string(),
            file_id: "file-1".to_string(),
            credential_id: "cred-1".to_string(),
            remote_uri: "https://example.com/files/abc".to_string(),
            remote_display_name: "notes.pdf".to_string(),
            remote_unique_name: "files/abc".to_string(),
            expiration_time,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("google".parse::<AiProvider>().unwrap(), AiProvider::Google);
        assert_eq!("Gemini".parse::<AiProvider>().unwrap(), AiProvider::Google);
        assert_eq!("OpenAI".parse::<AiProvider>().unwrap(), AiProvider::OpenAI);
        assert_eq!("other".parse::<AiProvider>().unwrap(), AiProvider::Other);
        assert!("anthropic".parse::<AiProvider>().is_err());
    }

    #[test]
    fn test_provider_display_roundtrips_through_storage_name() {
        for provider in AiProvider::ALL {
            assert_eq!(provider.to_string().parse::<AiProvider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_credential_source_quota() {
        assert!(!CredentialSource::Owned.counts_against_quota());
        assert!(CredentialSource::Shared.counts_against_quota());
        assert!(CredentialSource::System.counts_against_quota());
    }

    #[test]
    fn test_resolved_credential_debug_redacts_secret() {
        let cred = ResolvedCredential {
            credential_id: "cred-1".to_string(),
            provider: AiProvider::Google,
            secret: "AIza-very-secret".to_string(),
            source: CredentialSource::Owned,
        };
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_cache_entry_validity() {
        let now = Utc::now();
        assert!(entry(None).is_valid_at(now));
        assert!(entry(Some(now + Duration::hours(1))).is_valid_at(now));
        assert!(!entry(Some(now - Duration::seconds(1))).is_valid_at(now));
        assert!(!entry(Some(now)).is_valid_at(now));
    }

    #[test]
    fn test_provider_usage_remaining_never_negative() {
        let usage = ProviderUsage::new(AiProvider::Google, 12, 10, None);
        assert_eq!(usage.remaining, 0);
        let usage = ProviderUsage::new(AiProvider::Google, 3, 10, None);
        assert_eq!(usage.remaining, 7);
    }
}
