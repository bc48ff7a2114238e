//! Generate command
//!
//! Runs one generation through credential resolution, the file cache and the
//! provider, the same way the application does.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;

use studyhelper_core::models::AiProvider;
use studyhelper_core::services::ai::{GenerationOutput, GenerationRequest, ResponseSchema};

use super::Context;
use crate::output::{print_info, print_json, print_warning, OutputFormat};

#[derive(Args)]
pub struct GenerateArgs {
    /// Requesting user
    #[arg(long)]
    pub user: String,

    /// Prompt text
    #[arg(long)]
    pub prompt: String,

    /// File ID to attach (repeatable, order is kept)
    #[arg(long = "file")]
    pub files: Vec<String>,

    /// Provider: google, openai or other
    #[arg(long, default_value = "google")]
    pub provider: AiProvider,

    /// JSON schema file for a structured response
    #[arg(long)]
    pub schema: Option<String>,

    /// System instruction
    #[arg(long)]
    pub system: Option<String>,

    /// Model override
    #[arg(long)]
    pub model: Option<String>,

    /// Timeout in seconds, at least 1 (defaults to STUDYHELPER_REQUEST_TIMEOUT_SECS)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

pub async fn execute(ctx: &Context, args: GenerateArgs) -> Result<()> {
    let mut request = GenerationRequest::new(&args.user, args.provider, &args.prompt)
        .with_files(args.files);

    if let Some(path) = &args.schema {
        request = request.with_schema(load_schema(path)?);
    }
    if let Some(system) = args.system {
        request = request.with_system_instruction(system);
    }
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    if let Some(secs) = args.timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    print_info(
        &format!("Generating with {} for {}...", args.provider, args.user),
        ctx.quiet,
    );
    let result = ctx.services.orchestrator.generate(request).await?;

    if ctx.format == OutputFormat::Json {
        return print_json(&result);
    }

    print_info(
        &format!("Served by {} credential", result.credential_source),
        ctx.quiet,
    );
    match &result.output {
        GenerationOutput::Text { text } => println!("{}", text),
        GenerationOutput::Structured { value } => println!("{}", serde_json::to_string_pretty(value)?),
        GenerationOutput::RawFallback { raw, reason } => {
            print_warning(
                &format!("Response did not match the schema ({}); showing raw text", reason),
                ctx.quiet,
            );
            println!("{}", raw);
        }
    }
    Ok(())
}

fn load_schema(path: &str) -> Result<ResponseSchema> {
    let expanded = shellexpand::tilde(path).to_string();
    let content = std::fs::read_to_string(&expanded)
        .with_context(|| format!("Failed to read schema file {}", expanded))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Schema file {} is not valid JSON", expanded))?;
    Ok(ResponseSchema::new(value))
}
