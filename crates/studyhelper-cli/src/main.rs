//! Study Helper CLI - AI credential and usage administration
//!
//! A command-line interface for managing provider API keys, inspecting
//! free-tier usage and the provider file cache, and running generations.

mod commands;
mod output;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use studyhelper_core::services::ai::{AesGcmCodec, AiServices};
use studyhelper_core::{AiConfig, Database};

#[derive(Parser)]
#[command(name = "studyhelper")]
#[command(author, version, about = "Study Helper AI administration CLI", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override database path (or set STUDYHELPER_DB_PATH env var)
    #[arg(long, env = "STUDYHELPER_DB_PATH", global = true)]
    db: Option<String>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage provider API keys
    Keys {
        #[command(subcommand)]
        action: commands::keys::KeysAction,
    },

    /// Show free-tier usage
    Usage {
        #[command(subcommand)]
        action: commands::usage::UsageAction,
    },

    /// Inspect and clean the provider file cache
    Cache {
        #[command(subcommand)]
        action: commands::cache::CacheAction,
    },

    /// Register local files and grant access
    Files {
        #[command(subcommand)]
        action: commands::files::FilesAction,
    },

    /// Generate content with a provider
    Generate(commands::generate::GenerateArgs),

    /// Show effective configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        std::env::set_var("STUDYHELPER_DB_PATH", shellexpand::tilde(db_path).as_ref());
    }

    let db = Database::new().await?;
    let config = AiConfig::from_env()?;
    let secret = config
        .secret_key()
        .context("STUDYHELPER_SECRET_KEY is not set; it is required to encrypt stored API keys")?;
    let codec = AesGcmCodec::from_secret(secret)?;
    let services = AiServices::new(&db, Arc::new(config), Arc::new(codec));

    // Create context for commands
    let ctx = commands::Context {
        services,
        format: cli.format,
        quiet: cli.quiet,
    };

    // Execute command
    match cli.command {
        Commands::Keys { action } => commands::keys::execute(&ctx, action).await,
        Commands::Usage { action } => commands::usage::execute(&ctx, action).await,
        Commands::Cache { action } => commands::cache::execute(&ctx, action).await,
        Commands::Files { action } => commands::files::execute(&ctx, action).await,
        Commands::Generate(args) => commands::generate::execute(&ctx, args).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}
