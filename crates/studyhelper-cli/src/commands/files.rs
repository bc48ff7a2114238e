//! File commands
//!
//! Register local files for generation and share them with other users.

use std::path::Path;

use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use studyhelper_core::models::StoredFile;
use studyhelper_core::services::ai::FileStore;

use super::Context;
use crate::output::{print_single, print_success};

#[derive(Subcommand)]
pub enum FilesAction {
    /// Register a file that exists on disk
    Add {
        /// Path to the file
        path: String,

        /// Owning user
        #[arg(long)]
        owner: String,

        /// Mime type (guessed from the extension when omitted)
        #[arg(long)]
        mime: Option<String>,

        /// Display name (file name when omitted)
        #[arg(long)]
        name: Option<String>,
    },

    /// Grant a user read access to a file
    Grant {
        /// File ID
        file_id: String,

        #[arg(long)]
        user: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
pub struct FileRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub display_name: String,
    #[tabled(rename = "Type")]
    pub mime_type: String,
    #[tabled(rename = "Path")]
    pub path: String,
}

impl From<StoredFile> for FileRow {
    fn from(file: StoredFile) -> Self {
        Self {
            id: file.id,
            display_name: file.display_name,
            mime_type: file.mime_type,
            path: file.path,
        }
    }
}

pub async fn execute(ctx: &Context, action: FilesAction) -> Result<()> {
    match action {
        FilesAction::Add {
            path,
            owner,
            mime,
            name,
        } => add_file(ctx, &path, &owner, mime, name).await,
        FilesAction::Grant { file_id, user } => {
            if ctx.services.files.get_file(&file_id).await?.is_none() {
                return Err(anyhow!("File not found: {}", file_id));
            }
            ctx.services.files.grant_read(&user, &file_id).await?;
            print_success(&format!("Granted {} read access to {}", user, file_id), ctx.quiet);
            Ok(())
        }
    }
}

async fn add_file(
    ctx: &Context,
    path: &str,
    owner: &str,
    mime: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let expanded = shellexpand::tilde(path).to_string();
    let path = Path::new(&expanded);
    if !path.is_file() {
        return Err(anyhow!("File does not exist: {}", path.display()));
    }
    let absolute = path.canonicalize()?;

    let display_name = match name {
        Some(name) => name,
        None => absolute
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Cannot derive a name from {}", absolute.display()))?,
    };
    let mime_type = mime.unwrap_or_else(|| guess_mime_type(&absolute).to_string());

    let file = ctx
        .services
        .files
        .register(owner, &absolute.to_string_lossy(), &mime_type, &display_name)
        .await?;

    print_success(&format!("Registered {} as {}", display_name, file.id), ctx.quiet);
    print_single(&FileRow::from(file), ctx.format)
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
}
