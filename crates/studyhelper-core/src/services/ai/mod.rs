//! AI resource management
//!
//! Decides which API key serves a request, enforces the free-tier cap,
//! reuses provider-side file uploads and runs generations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ ContentGenerationOrchestrator                           │
//! │   - generate() / generate_typed()                       │
//! └─────────────────────────────────────────────────────────┘
//!     │               │                 │              │
//!     ▼               ▼                 ▼              ▼
//! ┌─────────┐  ┌────────────┐  ┌──────────────┐  ┌──────────────┐
//! │FileStore│  │ Credential │  │ External     │  │ trait        │
//! │(access) │  │ Resolver   │  │ FileCache    │  │ProviderClient│
//! └─────────┘  └────────────┘  └──────────────┘  └──────────────┘
//!                 │      │                            │
//!                 ▼      ▼                       ┌────┴────┐
//!      CredentialStore  UsageQuotaTracker        ▼         ▼
//!      (SecretCodec)                          ┌──────┐  ┌──────┐
//!                                             │Gemini│  │OpenAI│
//!                                             └──────┘  └──────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use studyhelper_core::services::ai::{AiServices, GenerationRequest};
//!
//! let config = AiConfig::from_env()?;
//! let codec = AesGcmCodec::from_secret(config.secret_key().unwrap_or_default())?;
//! let services = AiServices::new(&db, Arc::new(config), Arc::new(codec));
//! let result = services
//!     .orchestrator
//!     .generate(GenerationRequest::new("alice", AiProvider::Google, "Summarize").with_files([file_id]))
//!     .await?;
//! ```

pub mod credentials;
pub mod error;
pub mod file_cache;
pub mod file_store;
pub mod orchestrator;
pub mod provider;
pub mod resolver;
pub mod secret;
pub mod usage;

use std::sync::Arc;

pub use credentials::CredentialStore;
pub use error::{AiError, ProviderError};
pub use file_cache::ExternalFileCache;
pub use file_store::{FileStore, SqliteFileStore};
pub use orchestrator::{
    ContentGenerationOrchestrator, GenerationOutput, GenerationRequest, GenerationResult,
    TypedOutput,
};
pub use provider::{
    ContentPart, GeminiClient, GenerateParams, OpenAiClient, ProviderClient, ProviderRegistry,
    ResponseSchema, UploadSource, UploadedFile,
};
pub use resolver::{CredentialResolver, CredentialStrategy};
pub use secret::{AesGcmCodec, SecretCodec};
pub use usage::UsageQuotaTracker;

use crate::config::AiConfig;
use crate::db::Database;

/// Every AI service wired over one database, built once per process
pub struct AiServices {
    pub credentials: CredentialStore,
    pub usage: UsageQuotaTracker,
    pub cache: ExternalFileCache,
    pub files: SqliteFileStore,
    pub providers: ProviderRegistry,
    pub orchestrator: ContentGenerationOrchestrator,
    pub config: Arc<AiConfig>,
}

impl AiServices {
    /// Wire the services with the default Gemini / OpenAI clients
    pub fn new(db: &Database, config: Arc<AiConfig>, codec: Arc<dyn SecretCodec>) -> Self {
        let providers = ProviderRegistry::with_defaults(&config);
        Self::with_providers(db, config, codec, providers)
    }

    pub fn with_providers(
        db: &Database,
        config: Arc<AiConfig>,
        codec: Arc<dyn SecretCodec>,
        providers: ProviderRegistry,
    ) -> Self {
        let credentials = CredentialStore::new(db.pool.clone(), codec);
        let usage = UsageQuotaTracker::new(db.pool.clone());
        let cache = ExternalFileCache::new(db.pool.clone());
        let files = SqliteFileStore::new(db.pool.clone());

        let resolver = CredentialResolver::new(credentials.clone(), usage.clone(), config.clone());
        let orchestrator = ContentGenerationOrchestrator::new(
            resolver,
            cache.clone(),
            usage.clone(),
            credentials.clone(),
            Arc::new(files.clone()),
            providers.clone(),
            config.clone(),
        );

        Self {
            credentials,
            usage,
            cache,
            files,
            providers,
            orchestrator,
            config,
        }
    }
}
