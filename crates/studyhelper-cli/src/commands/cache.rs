//! Cache commands
//!
//! Provider-side upload cache inspection and cleanup.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use studyhelper_core::models::CacheEntry;

use super::{format_time, Context};
use crate::output::{print_output, print_success};

#[derive(Subcommand)]
pub enum CacheAction {
    /// List cached uploads for a key (`system:<provider>` for system keys)
    List {
        #[arg(long)]
        credential: String,
    },

    /// Delete expired entries
    Purge,
}

#[derive(Debug, Serialize, Tabled)]
pub struct CacheRow {
    #[tabled(rename = "File")]
    pub file_id: String,
    #[tabled(rename = "Remote")]
    pub remote_unique_name: String,
    #[tabled(rename = "Expires")]
    pub expiration_time: String,
    #[tabled(rename = "Status")]
    pub status: String,
}

impl From<&CacheEntry> for CacheRow {
    fn from(entry: &CacheEntry) -> Self {
        let status = if entry.is_valid_at(Utc::now()) { "valid" } else { "expired" };
        Self {
            file_id: entry.file_id.clone(),
            remote_unique_name: entry.remote_unique_name.clone(),
            expiration_time: entry
                .expiration_time
                .map(|_| format_time(entry.expiration_time))
                .unwrap_or_else(|| "never".to_string()),
            status: status.to_string(),
        }
    }
}

pub async fn execute(ctx: &Context, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::List { credential } => {
            let entries = ctx.services.cache.list_for_credential(&credential).await?;
            let rows: Vec<CacheRow> = entries.iter().map(CacheRow::from).collect();
            print_output(&rows, ctx.format)
        }
        CacheAction::Purge => {
            let purged = ctx.services.cache.purge_expired(Utc::now()).await?;
            print_success(&format!("Purged {} expired cache entries", purged), ctx.quiet);
            Ok(())
        }
    }
}
