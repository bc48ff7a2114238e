//! Integration tests for credential fallback, free-tier quota and file caching
//! through the generation orchestrator

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use studyhelper_core::models::{AiProvider, CredentialSource, ResolvedCredential};
use studyhelper_core::services::ai::{
    AesGcmCodec, AiError, AiServices, ContentPart, GenerateParams, GenerationOutput,
    GenerationRequest, ProviderClient, ProviderError, ProviderRegistry, ResponseSchema,
    TypedOutput, UploadSource, UploadedFile,
};
use sqlx::SqlitePool;
use studyhelper_core::{AiConfig, Database};
use tempfile::TempDir;

const SHARED_ACCOUNT: &str = "free-account";

/// Provider double that counts calls and records the last generation
struct MockProvider {
    uploads: AtomicUsize,
    generations: AtomicUsize,
    response: Mutex<String>,
    generate_delay: Option<Duration>,
    fail_generate: bool,
    last_params: Mutex<Option<GenerateParams>>,
    /// Statement run against the database while the generation is in flight
    during_generate: Mutex<Option<(SqlitePool, &'static str)>>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            uploads: AtomicUsize::new(0),
            generations: AtomicUsize::new(0),
            response: Mutex::new("Here is your summary".to_string()),
            generate_delay: None,
            fail_generate: false,
            last_params: Mutex::new(None),
            during_generate: Mutex::new(None),
        }
    }

    fn responding(text: &str) -> Self {
        let mock = Self::new();
        *mock.response.lock().unwrap() = text.to_string();
        mock
    }

    fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn provider(&self) -> AiProvider {
        AiProvider::Google
    }

    async fn upload(
        &self,
        _api_key: &str,
        file: &UploadSource,
    ) -> Result<UploadedFile, ProviderError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadedFile {
            remote_uri: format!("https://files.example/{}/{}", file.display_name, n),
            remote_unique_name: format!("files/{}-{}", file.display_name, n),
            display_name: file.display_name.clone(),
            expiration_time: Some(chrono::Utc::now() + chrono::Duration::hours(48)),
        })
    }

    async fn generate(
        &self,
        _api_key: &str,
        params: &GenerateParams,
    ) -> Result<String, ProviderError> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        if let Some(delay) = self.generate_delay {
            tokio::time::sleep(delay).await;
        }
        let statement = self.during_generate.lock().unwrap().take();
        if let Some((pool, sql)) = statement {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        if self.fail_generate {
            return Err(ProviderError::Api("HTTP 503: overloaded".to_string()));
        }
        Ok(self.response.lock().unwrap().clone())
    }
}

struct Harness {
    services: AiServices,
    mock: Arc<MockProvider>,
    pool: SqlitePool,
    _dir: TempDir,
}

async fn harness_with(mock: MockProvider, config: AiConfig) -> Harness {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::open(temp_dir.path().join("test.db"))
        .await
        .expect("Failed to create test database");

    let mock = Arc::new(mock);
    let mut registry = ProviderRegistry::new();
    registry.register(mock.clone());

    let codec = AesGcmCodec::from_secret("generation-test-secret").unwrap();
    let services = AiServices::with_providers(&db, Arc::new(config), Arc::new(codec), registry);
    Harness {
        services,
        mock,
        pool: db.pool.clone(),
        _dir: temp_dir,
    }
}

fn config() -> AiConfig {
    AiConfig::default()
        .with_free_tier_limit(AiProvider::Google, 10)
        .with_shared_account(SHARED_ACCOUNT)
}

async fn harness() -> Harness {
    harness_with(MockProvider::new(), config()).await
}

impl Harness {
    async fn add_shared_key(&self) -> String {
        self.services
            .credentials
            .create(SHARED_ACCOUNT, AiProvider::Google, "shared-key", true)
            .await
            .unwrap()
            .id
    }

    async fn add_file(&self, owner: &str, name: &str) -> String {
        self.services
            .files
            .register(owner, &format!("/data/{}", name), "application/pdf", name)
            .await
            .unwrap()
            .id
    }

    async fn count(&self, user: &str) -> i64 {
        self.services
            .usage
            .get(user, AiProvider::Google)
            .await
            .unwrap()
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

fn request(user: &str) -> GenerationRequest {
    GenerationRequest::new(user, AiProvider::Google, "Summarize the lecture")
}

#[tokio::test]
async fn test_owned_credential_never_charges_quota() {
    let h = harness().await;
    let key = h
        .services
        .credentials
        .create("alice", AiProvider::Google, "alice-key", true)
        .await
        .unwrap();

    for _ in 0..15 {
        let result = h.services.orchestrator.generate(request("alice")).await.unwrap();
        assert_eq!(result.credential_source, CredentialSource::Owned);
    }

    assert!(h.services.usage.get("alice", AiProvider::Google).await.unwrap().is_none());
    let key = h.services.credentials.get("alice", &key.id).await.unwrap().unwrap();
    assert!(key.last_used_at.is_some());
}

#[tokio::test]
async fn test_shared_credential_charges_quota_after_success() {
    let h = harness().await;
    let shared_id = h.add_shared_key().await;

    let result = h.services.orchestrator.generate(request("bob")).await.unwrap();

    assert_eq!(result.credential_source, CredentialSource::Shared);
    assert_eq!(
        result.output,
        GenerationOutput::Text {
            text: "Here is your summary".to_string()
        }
    );
    assert_eq!(h.count("bob").await, 1);
    let shared = h
        .services
        .credentials
        .get(SHARED_ACCOUNT, &shared_id)
        .await
        .unwrap()
        .unwrap();
    assert!(shared.last_used_at.is_some());
}

#[tokio::test]
async fn test_quota_boundary_at_limit() {
    let h = harness().await;
    h.add_shared_key().await;
    for _ in 0..9 {
        h.services.usage.increment("bob", AiProvider::Google).await.unwrap();
    }

    // count = 9: one more call allowed, which sets count = 10
    h.services.orchestrator.generate(request("bob")).await.unwrap();
    assert_eq!(h.count("bob").await, 10);

    // count = 10: blocked before any provider call
    let err = h.services.orchestrator.generate(request("bob")).await.unwrap_err();
    assert!(matches!(err, AiError::QuotaExceeded { limit: 10, .. }));
    assert_eq!(h.mock.generations(), 1);
    assert_eq!(h.count("bob").await, 10);
}

#[tokio::test]
async fn test_system_credential_is_cached_under_synthetic_id() {
    let h = harness_with(
        MockProvider::new(),
        config().with_system_key(AiProvider::Google, "system-key"),
    )
    .await;
    let file_id = h.add_file("bob", "notes.pdf").await;

    let result = h
        .services
        .orchestrator
        .generate(request("bob").with_files([file_id.as_str()]))
        .await
        .unwrap();

    assert_eq!(result.credential_source, CredentialSource::System);
    assert_eq!(h.count("bob").await, 1);
    let system_id = ResolvedCredential::system_id(AiProvider::Google);
    let entries = h.services.cache.list_for_credential(&system_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_id, file_id);
}

#[tokio::test]
async fn test_no_credential_available() {
    let h = harness().await;
    let err = h.services.orchestrator.generate(request("bob")).await.unwrap_err();
    assert!(matches!(err, AiError::NoCredentialAvailable { .. }));
    assert_eq!(h.mock.generations(), 0);
}

#[tokio::test]
async fn test_files_uploaded_once_and_sent_in_order() {
    let h = harness().await;
    h.services
        .credentials
        .create("alice", AiProvider::Google, "alice-key", true)
        .await
        .unwrap();
    let first = h.add_file("alice", "chapter1.pdf").await;
    let second = h.add_file("alice", "chapter2.pdf").await;

    for _ in 0..2 {
        h.services
            .orchestrator
            .generate(request("alice").with_files([second.as_str(), first.as_str()]))
            .await
            .unwrap();
    }

    // Second call is a pure cache hit
    assert_eq!(h.mock.uploads(), 2);
    assert_eq!(h.mock.generations(), 2);

    let params = h.mock.last_params.lock().unwrap().clone().unwrap();
    assert_eq!(params.parts.len(), 3);
    match (&params.parts[0], &params.parts[1], &params.parts[2]) {
        (
            ContentPart::File { uri: a, .. },
            ContentPart::File { uri: b, .. },
            ContentPart::Text { text },
        ) => {
            assert!(a.contains("chapter2.pdf"));
            assert!(b.contains("chapter1.pdf"));
            assert_eq!(text, "Summarize the lecture");
        }
        other => panic!("unexpected part order: {:?}", other),
    }
}

#[tokio::test]
async fn test_access_denied_before_any_side_effect() {
    let h = harness().await;
    h.add_shared_key().await;
    let own = h.add_file("bob", "mine.pdf").await;
    let foreign = h.add_file("carol", "private.pdf").await;

    let err = h
        .services
        .orchestrator
        .generate(request("bob").with_files([own.as_str(), foreign.as_str()]))
        .await
        .unwrap_err();

    match err {
        AiError::AccessDenied { file_id } => assert_eq!(file_id, foreign),
        other => panic!("expected AccessDenied, got {:?}", other),
    }
    assert!(nothing_happened(&h).await);
}

async fn nothing_happened(h: &Harness) -> bool {
    h.mock.uploads() == 0
        && h.mock.generations() == 0
        && h.services.usage.get("bob", AiProvider::Google).await.unwrap().is_none()
}

#[tokio::test]
async fn test_granted_file_is_readable() {
    let h = harness().await;
    h.add_shared_key().await;
    let shared_file = h.add_file("carol", "handout.pdf").await;
    h.services.files.grant_read("bob", &shared_file).await.unwrap();

    let result = h
        .services
        .orchestrator
        .generate(request("bob").with_files([shared_file.as_str()]))
        .await
        .unwrap();
    assert_eq!(result.remote_files.len(), 1);
}

#[tokio::test]
async fn test_missing_file_fails_fast() {
    let h = harness().await;
    h.add_shared_key().await;

    let err = h
        .services
        .orchestrator
        .generate(request("bob").with_files(["does-not-exist"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::FileNotFound { .. }));
    assert!(err.is_client_error());
    assert_eq!(h.mock.generations(), 0);
}

#[tokio::test]
async fn test_malformed_structured_output_returns_raw_text() {
    let h = harness_with(MockProvider::responding("{\"title\": \"Cells\", "), config()).await;
    h.add_shared_key().await;
    let schema = ResponseSchema::new(json!({
        "type": "object",
        "required": ["title"],
        "properties": { "title": { "type": "string" } }
    }));

    let result = h
        .services
        .orchestrator
        .generate(request("bob").with_schema(schema))
        .await
        .unwrap();

    match result.output {
        GenerationOutput::RawFallback { raw, .. } => assert_eq!(raw, "{\"title\": \"Cells\", "),
        other => panic!("expected raw fallback, got {:?}", other),
    }
    // The provider call succeeded, so it is still charged
    assert_eq!(h.count("bob").await, 1);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Quiz {
    title: String,
    questions: Vec<String>,
}

#[tokio::test]
async fn test_generate_typed() {
    let h = harness_with(
        MockProvider::responding(r#"{"title":"Cells","questions":["What is ATP?"]}"#),
        config(),
    )
    .await;
    h.add_shared_key().await;
    let schema = ResponseSchema::new(json!({ "type": "object", "required": ["title", "questions"] }));

    let output = h
        .services
        .orchestrator
        .generate_typed::<Quiz>(request("bob").with_schema(schema))
        .await
        .unwrap();

    assert_eq!(
        output,
        TypedOutput::Parsed(Quiz {
            title: "Cells".to_string(),
            questions: vec!["What is ATP?".to_string()],
        })
    );
}

#[tokio::test]
async fn test_generation_failure_charges_nothing() {
    let mut mock = MockProvider::new();
    mock.fail_generate = true;
    let h = harness_with(mock, config()).await;
    h.add_shared_key().await;

    let err = h.services.orchestrator.generate(request("bob")).await.unwrap_err();

    assert!(matches!(err, AiError::GenerationFailed { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.count("bob").await, 0);
}

#[tokio::test]
async fn test_timeout_keeps_upload_and_charges_nothing() {
    let mut mock = MockProvider::new();
    mock.generate_delay = Some(Duration::from_secs(5));
    let h = harness_with(mock, config()).await;
    let shared_id = h.add_shared_key().await;
    let file_id = h.add_file("bob", "notes.pdf").await;

    let err = h
        .services
        .orchestrator
        .generate(
            request("bob")
                .with_files([file_id.as_str()])
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::GenerationFailed { .. }));
    assert_eq!(h.count("bob").await, 0);
    // The completed upload stays cached for a retry
    assert!(h
        .services
        .cache
        .find_valid(&file_id, &shared_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_unregistered_provider_is_unsupported() {
    let h = harness().await;
    let err = h
        .services
        .orchestrator
        .generate(GenerationRequest::new("bob", AiProvider::OpenAI, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::UnsupportedProvider(AiProvider::OpenAI)));
}

#[tokio::test]
async fn test_deleting_credential_drops_its_cache_entries() {
    let h = harness().await;
    let key = h
        .services
        .credentials
        .create("alice", AiProvider::Google, "alice-key", true)
        .await
        .unwrap();
    let file_id = h.add_file("alice", "notes.pdf").await;
    h.services
        .orchestrator
        .generate(request("alice").with_files([file_id.as_str()]))
        .await
        .unwrap();
    assert_eq!(h.services.cache.list_for_credential(&key.id).await.unwrap().len(), 1);

    let removed = h.services.credentials.delete("alice", &key.id).await.unwrap();
    assert_eq!(removed, Some(1));
    assert!(h.services.cache.list_for_credential(&key.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_usage_write_failure_still_returns_content() {
    let h = harness_with(MockProvider::responding("a finished summary"), config()).await;
    h.add_shared_key().await;
    *h.mock.during_generate.lock().unwrap() =
        Some((h.pool.clone(), "DROP TABLE quota_counters"));

    let result = h.services.orchestrator.generate(request("bob")).await.unwrap();

    assert_eq!(result.credential_source, CredentialSource::Shared);
    assert_eq!(
        result.output,
        GenerationOutput::Text {
            text: "a finished summary".to_string()
        }
    );
    assert_eq!(h.mock.generations(), 1);
}

#[tokio::test]
async fn test_last_used_write_failure_still_returns_content() {
    let h = harness().await;
    let key = h
        .services
        .credentials
        .create("alice", AiProvider::Google, "alice-key", true)
        .await
        .unwrap();
    *h.mock.during_generate.lock().unwrap() = Some((
        h.pool.clone(),
        "CREATE TRIGGER credentials_read_only BEFORE UPDATE ON credentials \
         BEGIN SELECT RAISE(ABORT, 'credentials are read only'); END",
    ));

    let result = h.services.orchestrator.generate(request("alice")).await.unwrap();

    assert_eq!(result.credential_source, CredentialSource::Owned);
    let key = h.services.credentials.get("alice", &key.id).await.unwrap().unwrap();
    assert!(key.last_used_at.is_none());
}
