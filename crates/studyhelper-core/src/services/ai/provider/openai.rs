//! OpenAI client
//!
//! Uploads go to the Files API with purpose `user_data`; generation uses the
//! Responses API so uploaded files can be referenced by id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{error_from_response, ContentPart, GenerateParams, ProviderClient, UploadSource, UploadedFile};
use crate::models::AiProvider;
use crate::services::ai::error::ProviderError;

const OPENAI_BASE_URL: &str = "https://api.openai.com";

// ============ Files API types ============

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
    #[serde(default)]
    filename: Option<String>,
    /// Unix seconds; absent when the file never expires
    #[serde(default)]
    expires_at: Option<i64>,
}

impl FileObject {
    fn into_uploaded(self, fallback_display_name: &str) -> UploadedFile {
        UploadedFile {
            remote_uri: self.id.clone(),
            remote_unique_name: self.id,
            display_name: self
                .filename
                .unwrap_or_else(|| fallback_display_name.to_string()),
            expiration_time: self
                .expires_at
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        }
    }
}

// ============ Responses API types ============

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextConfig>,
}

#[derive(Debug, Serialize)]
struct InputMessage {
    role: String,
    content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent {
    InputFile { file_id: String },
    InputText { text: String },
}

#[derive(Debug, Serialize)]
struct TextConfig {
    format: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    #[serde(rename = "type")]
    format_type: String,
    name: String,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    content: Option<Vec<OutputContent>>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

fn build_request(model: &str, params: &GenerateParams) -> ResponsesRequest {
    let content = params
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::File { uri, .. } => InputContent::InputFile {
                file_id: uri.clone(),
            },
            ContentPart::Text { text } => InputContent::InputText { text: text.clone() },
        })
        .collect();

    ResponsesRequest {
        model: model.to_string(),
        input: vec![InputMessage {
            role: "user".to_string(),
            content,
        }],
        instructions: params.system_instruction.clone(),
        text: params.response_schema.as_ref().map(|schema| TextConfig {
            format: JsonSchemaFormat {
                format_type: "json_schema".to_string(),
                name: "response".to_string(),
                schema: schema.as_value().clone(),
            },
        }),
    }
}

fn extract_text(response: ResponsesResponse) -> Result<String, ProviderError> {
    let mut output_text = String::new();
    for item in response.output.iter().filter(|i| i.item_type == "message") {
        for content in item.content.iter().flatten() {
            match content.content_type.as_str() {
                "output_text" | "text" => {
                    if let Some(text) = &content.text {
                        output_text.push_str(text);
                    }
                }
                "refusal" => {
                    return Err(ProviderError::Api(format!(
                        "Model refused: {}",
                        content.refusal.as_deref().unwrap_or("no reason given")
                    )));
                }
                _ => {}
            }
        }
    }

    if output_text.trim().is_empty() {
        return Err(ProviderError::Parse(
            "Responses API returned no text content".to_string(),
        ));
    }
    Ok(output_text)
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn provider(&self) -> AiProvider {
        AiProvider::OpenAI
    }

    async fn upload(
        &self,
        api_key: &str,
        file: &UploadSource,
    ) -> Result<UploadedFile, ProviderError> {
        let bytes = tokio::fs::read(&file.path).await?;
        log::debug!(
            "[ai:openai] Uploading {} ({} bytes, {})",
            file.display_name,
            bytes.len(),
            file.mime_type
        );

        let file_part = multipart::Part::bytes(bytes)
            .file_name(file.display_name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e: reqwest::Error| ProviderError::Api(e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", file_part)
            .text("purpose", "user_data");

        let response = self
            .client
            .post(format!("{}/v1/files", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let uploaded: FileObject = response.json().await?;
        log::info!("[ai:openai] Uploaded {} as {}", file.display_name, uploaded.id);
        Ok(uploaded.into_uploaded(&file.display_name))
    }

    async fn generate(
        &self,
        api_key: &str,
        params: &GenerateParams,
    ) -> Result<String, ProviderError> {
        let model = params.model.as_deref().unwrap_or(&self.model);
        let request = build_request(model, params);

        let response = self
            .client
            .post(format!("{}/v1/responses", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await?;
        log::debug!(
            "[ai:openai] Responses API raw response (first 500 chars): {}",
            body.chars().take(500).collect::<String>()
        );
        extract_text(serde_json::from_str(&body)?)
    }

    async fn verify_key(&self, api_key: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}
