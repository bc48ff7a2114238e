//! Config commands
//!
//! Shows the configuration the AI services run with.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use studyhelper_core::config::AiConfig;
use studyhelper_core::models::AiProvider;

use super::Context;
use crate::output::print_output;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

impl ConfigRow {
    fn new(key: &str, value: String, env_var: &str) -> Self {
        let source = if std::env::var(env_var).is_ok_and(|v| !v.trim().is_empty()) {
            "env"
        } else {
            "default"
        };
        Self {
            key: key.to_string(),
            value,
            source: source.to_string(),
        }
    }
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let rows = config_rows(&ctx.services.config);
            print_output(&rows, ctx.format)
        }
    }
}

fn config_rows(config: &AiConfig) -> Vec<ConfigRow> {
    let mut rows = Vec::new();

    let db_path = studyhelper_core::db::get_db_path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());
    rows.push(ConfigRow::new("STUDYHELPER_DB_PATH", db_path, "STUDYHELPER_DB_PATH"));

    for provider in AiProvider::ALL {
        let var = format!("STUDYHELPER_FREE_TIER_{}_LIMIT", provider.as_str().to_uppercase());
        rows.push(ConfigRow::new(
            &var,
            config.free_tier_limit(provider).to_string(),
            &var,
        ));
    }

    rows.push(ConfigRow::new(
        "STUDYHELPER_FREE_USER_ID",
        config
            .shared_account_id
            .clone()
            .unwrap_or_else(|| "-".to_string()),
        "STUDYHELPER_FREE_USER_ID",
    ));

    for (provider, var) in [
        (AiProvider::Google, "GEMINI_API_KEY"),
        (AiProvider::OpenAI, "OPENAI_API_KEY"),
    ] {
        rows.push(ConfigRow::new(var, mask_token(config.system_key(provider)), var));
    }

    for (provider, var) in [
        (AiProvider::Google, "STUDYHELPER_GEMINI_MODEL"),
        (AiProvider::OpenAI, "STUDYHELPER_OPENAI_MODEL"),
    ] {
        rows.push(ConfigRow::new(
            var,
            config.model(provider).unwrap_or("-").to_string(),
            var,
        ));
    }

    rows.push(ConfigRow::new(
        "STUDYHELPER_SECRET_KEY",
        mask_token(config.secret_key()),
        "STUDYHELPER_SECRET_KEY",
    ));

    rows.push(ConfigRow::new(
        "STUDYHELPER_REQUEST_TIMEOUT_SECS",
        config.request_timeout.as_secs().to_string(),
        "STUDYHELPER_REQUEST_TIMEOUT_SECS",
    ));

    rows
}

fn mask_token(token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => "****".to_string(),
        _ => "-".to_string(),
    }
}
