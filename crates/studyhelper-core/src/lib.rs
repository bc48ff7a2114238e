//! # studyhelper-core
//!
//! AI resource management for Study Helper.
//!
//! This crate provides:
//! - Database operations (`db` module)
//! - Data models (`models` module)
//! - Configuration from the environment (`config` module)
//! - Credential resolution, free-tier quota, provider file cache and
//!   generation orchestration (`services::ai`)
//! - Unified error handling (`error` module)

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

// Re-exports for convenience
pub use config::AiConfig;
pub use db::Database;
pub use error::{Error, Result};

pub use models::{
    AiProvider, CacheEntry, Credential, CredentialResponse, CredentialSource, CredentialUpdate,
    ProviderUsage, QuotaCounter, ResolvedCredential, StoredFile, UsageSummary,
};

pub use services::{
    AiError, AiServices, ContentGenerationOrchestrator, CredentialResolver, CredentialStore,
    ExternalFileCache, GenerationOutput, GenerationRequest, GenerationResult, ProviderClient,
    ProviderRegistry, UsageQuotaTracker,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
