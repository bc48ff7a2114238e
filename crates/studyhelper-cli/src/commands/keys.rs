//! Key commands
//!
//! Commands for managing provider API keys.

use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use studyhelper_core::models::{AiProvider, CredentialResponse, CredentialUpdate};

use super::{format_time, Context};
use crate::output::{print_error, print_info, print_output, print_single, print_success};

#[derive(Subcommand)]
pub enum KeysAction {
    /// Store a new API key for a user
    Add {
        /// Owner of the key
        #[arg(long)]
        user: String,

        /// Provider: google, openai or other
        #[arg(long, default_value = "google")]
        provider: AiProvider,

        /// The API key
        #[arg(long)]
        key: String,

        /// Store the key as inactive
        #[arg(long)]
        inactive: bool,

        /// Check the key against the provider before storing it
        #[arg(long)]
        verify: bool,
    },

    /// List a user's keys
    List {
        #[arg(long)]
        user: String,

        /// Only keys for this provider
        #[arg(long)]
        provider: Option<AiProvider>,

        /// Only active (true) or inactive (false) keys
        #[arg(long)]
        active: Option<bool>,
    },

    /// Show a single key
    Show {
        #[arg(long)]
        user: String,

        /// Key ID
        id: String,
    },

    /// Update or rotate a key
    Update {
        #[arg(long)]
        user: String,

        /// Key ID
        id: String,

        /// New provider
        #[arg(long)]
        provider: Option<AiProvider>,

        /// New API key (rotation)
        #[arg(long)]
        key: Option<String>,

        /// Activate (true) or deactivate (false)
        #[arg(long)]
        active: Option<bool>,
    },

    /// Delete a key and its cached provider uploads
    Delete {
        #[arg(long)]
        user: String,

        /// Key ID
        id: String,
    },

    /// Give the shared free-tier account the configured system keys
    SeedShared,
}

/// Key row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct KeyRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "Active")]
    pub active: String,
    #[tabled(rename = "Created")]
    pub created_at: String,
    #[tabled(rename = "Last Used")]
    pub last_used_at: String,
}

impl From<CredentialResponse> for KeyRow {
    fn from(credential: CredentialResponse) -> Self {
        Self {
            id: credential.id,
            provider: credential.provider,
            active: if credential.is_active { "yes" } else { "no" }.to_string(),
            created_at: format_time(Some(credential.created_at)),
            last_used_at: format_time(credential.last_used_at),
        }
    }
}

pub async fn execute(ctx: &Context, action: KeysAction) -> Result<()> {
    match action {
        KeysAction::Add {
            user,
            provider,
            key,
            inactive,
            verify,
        } => add_key(ctx, &user, provider, &key, !inactive, verify).await,
        KeysAction::List {
            user,
            provider,
            active,
        } => list_keys(ctx, &user, provider, active).await,
        KeysAction::Show { user, id } => show_key(ctx, &user, &id).await,
        KeysAction::Update {
            user,
            id,
            provider,
            key,
            active,
        } => {
            let update = CredentialUpdate {
                provider,
                secret: key,
                is_active: active,
            };
            update_key(ctx, &user, &id, update).await
        }
        KeysAction::Delete { user, id } => delete_key(ctx, &user, &id).await,
        KeysAction::SeedShared => seed_shared(ctx).await,
    }
}

async fn add_key(
    ctx: &Context,
    user: &str,
    provider: AiProvider,
    key: &str,
    is_active: bool,
    verify: bool,
) -> Result<()> {
    if verify {
        let client = ctx
            .services
            .providers
            .get(provider)
            .ok_or_else(|| anyhow!("No client for provider {}, cannot verify", provider))?;
        print_info(&format!("Verifying {} key...", provider), ctx.quiet);
        client
            .verify_key(key)
            .await
            .map_err(|e| anyhow!("Key rejected by {}: {}", provider, e))?;
    }

    let credential = ctx
        .services
        .credentials
        .create(user, provider, key, is_active)
        .await?;

    print_success(
        &format!("Stored {} key {} for {}", provider, credential.id, user),
        ctx.quiet,
    );
    let row: KeyRow = CredentialResponse::from(credential).into();
    print_single(&row, ctx.format)
}

async fn list_keys(
    ctx: &Context,
    user: &str,
    provider: Option<AiProvider>,
    active: Option<bool>,
) -> Result<()> {
    let rows: Vec<KeyRow> = ctx
        .services
        .credentials
        .list(user, provider, active)
        .await?
        .into_iter()
        .map(|c| CredentialResponse::from(c).into())
        .collect();
    print_output(&rows, ctx.format)
}

async fn show_key(ctx: &Context, user: &str, id: &str) -> Result<()> {
    match ctx.services.credentials.get(user, id).await? {
        Some(credential) => {
            let row: KeyRow = CredentialResponse::from(credential).into();
            print_single(&row, ctx.format)
        }
        None => {
            print_error(&format!("Key not found: {}", id));
            Ok(())
        }
    }
}

async fn update_key(ctx: &Context, user: &str, id: &str, update: CredentialUpdate) -> Result<()> {
    let rotated = update.secret.is_some();
    match ctx.services.credentials.update(user, id, update).await? {
        Some(credential) => {
            let message = if rotated {
                format!("Rotated key {}", id)
            } else {
                format!("Updated key {}", id)
            };
            print_success(&message, ctx.quiet);
            let row: KeyRow = CredentialResponse::from(credential).into();
            print_single(&row, ctx.format)
        }
        None => {
            print_error(&format!("Key not found: {}", id));
            Ok(())
        }
    }
}

async fn delete_key(ctx: &Context, user: &str, id: &str) -> Result<()> {
    match ctx.services.credentials.delete(user, id).await? {
        Some(cache_entries) => {
            print_success(
                &format!("Deleted key {} ({} cached uploads removed)", id, cache_entries),
                ctx.quiet,
            );
        }
        None => print_error(&format!("Key not found: {}", id)),
    }
    Ok(())
}

async fn seed_shared(ctx: &Context) -> Result<()> {
    let config = &ctx.services.config;
    let shared_id = config
        .shared_account_id
        .as_deref()
        .ok_or_else(|| anyhow!("STUDYHELPER_FREE_USER_ID is not set"))?;

    let mut seeded = 0;
    for provider in AiProvider::ALL {
        let Some(key) = config.system_key(provider) else {
            continue;
        };
        let (credential, created) = ctx
            .services
            .credentials
            .ensure_credential(shared_id, provider, key)
            .await?;
        if created {
            seeded += 1;
            print_success(
                &format!("Seeded {} key {} for {}", provider, credential.id, shared_id),
                ctx.quiet,
            );
        } else {
            print_info(
                &format!("{} already has an active {} key", shared_id, provider),
                ctx.quiet,
            );
        }
    }

    if seeded == 0 {
        print_info("Nothing to seed", ctx.quiet);
    }
    Ok(())
}
