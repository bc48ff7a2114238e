//! Google Gemini client
//!
//! Files API (multipart upload, 48h expiration) and `generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{error_from_response, ContentPart, GenerateParams, ProviderClient, UploadSource, UploadedFile};
use crate::models::AiProvider;
use crate::services::ai::error::ProviderError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MAX_OUTPUT_TOKENS: u32 = 65000;
/// Polls of `files.get` while an upload is still PROCESSING
const PROCESSING_POLL_ATTEMPTS: u32 = 10;
const PROCESSING_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ============ Files API types ============

#[derive(Debug, Serialize)]
struct UploadMetadata<'a> {
    file: UploadMetadataFile<'a>,
}

#[derive(Debug, Serialize)]
struct UploadMetadataFile<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFile {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    uri: String,
    #[serde(default)]
    expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    state: Option<String>,
}

impl GeminiFile {
    fn is_processing(&self) -> bool {
        self.state.as_deref() == Some("PROCESSING")
    }

    /// Only ACTIVE (or state-less) files can be referenced in a request
    fn ensure_ready(&self) -> Result<(), ProviderError> {
        match self.state.as_deref() {
            Some("FAILED") => Err(ProviderError::Api(format!(
                "Gemini failed to process {}",
                self.name
            ))),
            Some("PROCESSING") => Err(ProviderError::Api(format!(
                "Gemini is still processing {} after {} checks",
                self.name, PROCESSING_POLL_ATTEMPTS
            ))),
            _ => Ok(()),
        }
    }

    fn into_uploaded(self, fallback_display_name: &str) -> UploadedFile {
        UploadedFile {
            remote_uri: self.uri,
            remote_unique_name: self.name,
            display_name: self
                .display_name
                .unwrap_or_else(|| fallback_display_name.to_string()),
            expiration_time: self.expiration_time,
        }
    }
}

// ============ generateContent types ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn build_request(params: &GenerateParams) -> GenerateContentRequest {
    let parts = params
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::File { uri, mime_type } => GeminiPart::File {
                file_data: FileData {
                    mime_type: mime_type.clone(),
                    file_uri: uri.clone(),
                },
            },
            ContentPart::Text { text } => GeminiPart::Text { text: text.clone() },
        })
        .collect();

    let system_instruction = params.system_instruction.as_ref().map(|text| GeminiContent {
        role: None,
        parts: vec![GeminiPart::Text { text: text.clone() }],
    });

    let (response_mime_type, response_schema) = match &params.response_schema {
        Some(schema) => (
            Some("application/json".to_string()),
            Some(schema.as_value().clone()),
        ),
        None => (None, None),
    };

    GenerateContentRequest {
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts,
        }],
        system_instruction,
        generation_config: GenerationConfig {
            max_output_tokens: MAX_OUTPUT_TOKENS,
            response_mime_type,
            response_schema,
        },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ProviderError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::Api(format!("Prompt blocked: {}", reason)));
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ProviderError::Parse("Gemini returned no text".to_string()));
    }
    Ok(text)
}

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    /// Point the client at another endpoint (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_file(&self, api_key: &str, name: &str) -> Result<GeminiFile, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider(&self) -> AiProvider {
        AiProvider::Google
    }

    async fn upload(
        &self,
        api_key: &str,
        file: &UploadSource,
    ) -> Result<UploadedFile, ProviderError> {
        let bytes = tokio::fs::read(&file.path).await?;
        log::debug!(
            "[ai:gemini] Uploading {} ({} bytes, {})",
            file.display_name,
            bytes.len(),
            file.mime_type
        );

        let metadata = serde_json::to_string(&UploadMetadata {
            file: UploadMetadataFile {
                display_name: &file.display_name,
            },
        })?;

        let metadata_part = multipart::Part::text(metadata)
            .mime_str("application/json")
            .map_err(|e: reqwest::Error| ProviderError::Api(e.to_string()))?;
        let file_part = multipart::Part::bytes(bytes)
            .file_name(file.display_name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e: reqwest::Error| ProviderError::Api(e.to_string()))?;
        let form = multipart::Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        let response = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", api_key)
            .header("X-Goog-Upload-Protocol", "multipart")
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let mut uploaded: GeminiFile = response.json::<UploadResponse>().await?.file;

        // Documents are processed asynchronously; wait until usable
        let mut attempts = 0;
        while uploaded.is_processing() && attempts < PROCESSING_POLL_ATTEMPTS {
            tokio::time::sleep(PROCESSING_POLL_INTERVAL).await;
            uploaded = self.get_file(api_key, &uploaded.name).await?;
            attempts += 1;
        }
        uploaded.ensure_ready()?;

        log::info!(
            "[ai:gemini] Uploaded {} as {} (expires {:?})",
            file.display_name,
            uploaded.name,
            uploaded.expiration_time
        );

        Ok(uploaded.into_uploaded(&file.display_name))
    }

    async fn generate(
        &self,
        api_key: &str,
        params: &GenerateParams,
    ) -> Result<String, ProviderError> {
        let model = params.model.as_deref().unwrap_or(&self.model);
        let body = build_request(params);

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, model
            ))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        extract_text(response.json().await?)
    }

    async fn verify_key(&self, api_key: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1beta/models?pageSize=1", self.base_url))
            .header("x-goog-api-key", api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai::provider::ResponseSchema;
    use serde_json::json;

    fn params(schema: Option<ResponseSchema>, system: Option<&str>) -> GenerateParams {
        GenerateParams {
            model: None,
            parts: vec![
                ContentPart::File {
                    uri: "https://generativelanguage.googleapis.com/v1beta/files/abc".to_string(),
                    mime_type: "application/pdf".to_string(),
                },
                ContentPart::text("Summarize this lecture"),
            ],
            response_schema: schema,
            system_instruction: system.map(str::to_string),
        }
    }

    fn file_in_state(state: Option<&str>) -> GeminiFile {
        serde_json::from_value(json!({
            "name": "files/abc",
            "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc",
            "state": state,
        }))
        .unwrap()
    }

    #[test]
    fn test_only_ready_files_are_accepted() {
        assert!(file_in_state(Some("ACTIVE")).ensure_ready().is_ok());
        assert!(file_in_state(None).ensure_ready().is_ok());

        let err = file_in_state(Some("PROCESSING")).ensure_ready().unwrap_err();
        assert!(err.to_string().contains("still processing files/abc"));
        let err = file_in_state(Some("FAILED")).ensure_ready().unwrap_err();
        assert!(err.to_string().contains("failed to process files/abc"));
    }

    #[test]
    fn test_request_keeps_part_order() {
        let body = serde_json::to_value(build_request(&params(None, None))).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(
            parts[0]["fileData"]["fileUri"],
            "https://generativelanguage.googleapis.com/v1beta/files/abc"
        );
        assert_eq!(parts[0]["fileData"]["mimeType"], "application/pdf");
        assert_eq!(parts[1]["text"], "Summarize this lecture");
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(body.get("systemInstruction").is_none());
        assert!(body["generationConfig"].get("responseSchema").is_none());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], MAX_OUTPUT_TOKENS);
    }

    #[test]
    fn test_request_with_schema_and_system_instruction() {
        let schema = ResponseSchema::new(json!({ "type": "OBJECT" }));
        let body =
            serde_json::to_value(build_request(&params(Some(schema), Some("Be concise")))).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be concise");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hello world");
    }

    #[test]
    fn test_extract_text_blocked_prompt() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();
        assert!(matches!(extract_text(response), Err(ProviderError::Api(_))));
    }

    #[test]
    fn test_extract_text_empty() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(extract_text(response), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_parse_upload_response() {
        let response: UploadResponse = serde_json::from_value(json!({
            "file": {
                "name": "files/abc123",
                "displayName": "lecture.pdf",
                "mimeType": "application/pdf",
                "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123",
                "expirationTime": "2026-02-06T10:30:00.123456Z",
                "state": "ACTIVE"
            }
        }))
        .unwrap();
        assert!(!response.file.is_processing());
        let uploaded = response.file.into_uploaded("fallback.pdf");
        assert_eq!(uploaded.remote_unique_name, "files/abc123");
        assert_eq!(uploaded.display_name, "lecture.pdf");
        assert!(uploaded.expiration_time.is_some());
    }
}
