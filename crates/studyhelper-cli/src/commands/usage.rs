//! Usage commands
//!
//! Free-tier usage per provider.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use studyhelper_core::models::ProviderUsage;

use super::{format_time, Context};
use crate::output::{print_info, print_json, print_output, OutputFormat};

#[derive(Subcommand)]
pub enum UsageAction {
    /// Show a user's free-tier usage and remaining calls
    Show {
        #[arg(long)]
        user: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
pub struct UsageRow {
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "Used")]
    pub used: i64,
    #[tabled(rename = "Limit")]
    pub limit: i64,
    #[tabled(rename = "Remaining")]
    pub remaining: i64,
    #[tabled(rename = "Last Used")]
    pub last_used_at: String,
}

impl From<&ProviderUsage> for UsageRow {
    fn from(usage: &ProviderUsage) -> Self {
        Self {
            provider: usage.provider.to_string(),
            used: usage.count,
            limit: usage.limit,
            remaining: usage.remaining,
            last_used_at: format_time(usage.last_used_at),
        }
    }
}

pub async fn execute(ctx: &Context, action: UsageAction) -> Result<()> {
    match action {
        UsageAction::Show { user } => show_usage(ctx, &user).await,
    }
}

async fn show_usage(ctx: &Context, user: &str) -> Result<()> {
    let has_own_keys = ctx.services.credentials.has_any_active(user).await?;
    let summary = ctx
        .services
        .usage
        .summary(user, &ctx.services.config, has_own_keys)
        .await?;

    if ctx.format == OutputFormat::Json {
        return print_json(&summary);
    }

    let rows: Vec<UsageRow> = summary.providers.iter().map(UsageRow::from).collect();
    print_output(&rows, ctx.format)?;
    if summary.has_own_keys {
        print_info(
            "User has own API keys; calls with them do not count against the free tier.",
            ctx.quiet,
        );
    }
    Ok(())
}
