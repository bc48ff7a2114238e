//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod cache;
pub mod config;
pub mod files;
pub mod generate;
pub mod keys;
pub mod usage;

use crate::output::OutputFormat;
use studyhelper_core::services::ai::AiServices;

/// Shared context for all commands
pub struct Context {
    pub services: AiServices,
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Short form of a timestamp for tables
pub(crate) fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
