//! Services module

pub mod ai;

pub use ai::{
    AiError, AiServices, ContentGenerationOrchestrator, CredentialResolver, CredentialStore,
    ExternalFileCache, GenerationOutput, GenerationRequest, GenerationResult, ProviderClient,
    ProviderRegistry, UsageQuotaTracker,
};
