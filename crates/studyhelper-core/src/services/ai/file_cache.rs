//! Provider-side file cache
//!
//! Maps (local file, credential) to the handle a provider returned for an
//! upload, so a file is uploaded once per credential until the provider
//! expires it.
//!
//! The lookup / upload / write sequence runs under a per-(file, credential)
//! async lock, and the write itself is an upsert on the (file_id,
//! credential_id) unique index. Concurrent callers for the same pair wait for
//! the first upload and then hit the cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::error::AiError;
use super::provider::{ProviderClient, UploadSource, UploadedFile};
use crate::models::{CacheEntry, ResolvedCredential, StoredFile};

const CACHE_COLUMNS: &str = "id, file_id, credential_id, remote_uri, remote_display_name, remote_unique_name, expiration_time, created_at, updated_at";

type PairKey = (String, String);

#[derive(Clone)]
pub struct ExternalFileCache {
    pool: SqlitePool,
    locks: Arc<Mutex<HashMap<PairKey, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ExternalFileCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return a valid cache entry for (file, credential), uploading the file
    /// through `client` on a miss or after expiration.
    ///
    /// Upload failures surface as `UploadFailed` and leave the table as it was.
    pub async fn get_or_upload(
        &self,
        file: &StoredFile,
        credential: &ResolvedCredential,
        client: &dyn ProviderClient,
    ) -> Result<CacheEntry, AiError> {
        if let Some(entry) = self.find_valid(&file.id, &credential.credential_id).await? {
            log::debug!(
                "[ai:cache] Hit for file {} credential {}",
                file.id,
                credential.credential_id
            );
            return Ok(entry);
        }

        let key = (file.id.clone(), credential.credential_id.clone());
        let pair_lock = self.pair_lock(&key);
        let result = {
            let _guard = pair_lock.lock().await;
            self.upload_locked(file, credential, client).await
        };
        self.release_pair_lock(&key, pair_lock);
        result
    }

    async fn upload_locked(
        &self,
        file: &StoredFile,
        credential: &ResolvedCredential,
        client: &dyn ProviderClient,
    ) -> Result<CacheEntry, AiError> {
        // Another task may have uploaded while we waited for the lock
        if let Some(entry) = self.find_valid(&file.id, &credential.credential_id).await? {
            log::debug!(
                "[ai:cache] Hit after wait for file {} credential {}",
                file.id,
                credential.credential_id
            );
            return Ok(entry);
        }

        log::info!(
            "[ai:cache] Uploading file {} to {} with credential {}",
            file.id,
            credential.provider,
            credential.credential_id
        );

        let source = UploadSource {
            path: PathBuf::from(&file.path),
            mime_type: file.mime_type.clone(),
            display_name: file.display_name.clone(),
        };
        let uploaded = client
            .upload(&credential.secret, &source)
            .await
            .map_err(|e| {
                log::warn!("[ai:cache] Upload of file {} failed: {}", file.id, e);
                AiError::UploadFailed {
                    provider: credential.provider,
                    message: e.to_string(),
                }
            })?;

        self.upsert(&file.id, &credential.credential_id, &uploaded).await
    }

    /// Insert a new entry, or refresh the existing one for the pair in place
    /// (keeping its id and `created_at`).
    async fn upsert(
        &self,
        file_id: &str,
        credential_id: &str,
        uploaded: &UploadedFile,
    ) -> Result<CacheEntry, AiError> {
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO file_cache
            (id, file_id, credential_id, remote_uri, remote_display_name, remote_unique_name,
             expiration_time, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id, credential_id) DO UPDATE SET
                remote_uri = excluded.remote_uri,
                remote_display_name = excluded.remote_display_name,
                remote_unique_name = excluded.remote_unique_name,
                expiration_time = excluded.expiration_time,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            CACHE_COLUMNS
        );

        let entry = sqlx::query_as::<_, CacheEntry>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(file_id)
            .bind(credential_id)
            .bind(&uploaded.remote_uri)
            .bind(&uploaded.display_name)
            .bind(&uploaded.remote_unique_name)
            .bind(uploaded.expiration_time)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        log::info!(
            "[ai:cache] Stored entry {} for file {} credential {} (expires {:?})",
            entry.id,
            file_id,
            credential_id,
            entry.expiration_time
        );

        Ok(entry)
    }

    /// The entry for (file, credential) if it has not expired
    pub async fn find_valid(
        &self,
        file_id: &str,
        credential_id: &str,
    ) -> Result<Option<CacheEntry>, AiError> {
        let sql = format!(
            "SELECT {} FROM file_cache WHERE file_id = ? AND credential_id = ?",
            CACHE_COLUMNS
        );
        let entry = sqlx::query_as::<_, CacheEntry>(&sql)
            .bind(file_id)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?;

        let now = Utc::now();
        Ok(entry.filter(|e| e.is_valid_at(now)))
    }

    /// All entries uploaded with a credential, expired ones included
    pub async fn list_for_credential(
        &self,
        credential_id: &str,
    ) -> Result<Vec<CacheEntry>, AiError> {
        let sql = format!(
            "SELECT {} FROM file_cache WHERE credential_id = ? ORDER BY updated_at DESC",
            CACHE_COLUMNS
        );
        Ok(sqlx::query_as::<_, CacheEntry>(&sql)
            .bind(credential_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Delete entries that expired before `now`. Never called implicitly.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AiError> {
        let sql = format!(
            "SELECT {} FROM file_cache WHERE expiration_time IS NOT NULL",
            CACHE_COLUMNS
        );
        let candidates = sqlx::query_as::<_, CacheEntry>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;
        let mut purged = 0;
        for entry in candidates.iter().filter(|e| !e.is_valid_at(now)) {
            purged += sqlx::query("DELETE FROM file_cache WHERE id = ?")
                .bind(&entry.id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        log::info!("[ai:cache] Purged {} expired entries", purged);
        Ok(purged)
    }

    fn pair_lock(&self, key: &PairKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    /// Drop the map slot once no other task holds the pair lock
    fn release_pair_lock(&self, key: &PairKey, pair_lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here
        if Arc::strong_count(&pair_lock) <= 2 {
            locks.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{AiProvider, CredentialSource};
    use crate::services::ai::error::ProviderError;
    use crate::services::ai::provider::GenerateParams;
    use crate::services::ai::file_store::SqliteFileStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeUploader {
        uploads: AtomicUsize,
        fail: bool,
        expires_in: Option<Duration>,
    }

    impl FakeUploader {
        fn new(expires_in: Option<Duration>) -> Self {
            Self {
                uploads: AtomicUsize::new(0),
                fail: false,
                expires_in,
            }
        }
    }

    #[async_trait]
    impl ProviderClient for FakeUploader {
        fn provider(&self) -> AiProvider {
            AiProvider::Google
        }

        async fn upload(
            &self,
            _api_key: &str,
            file: &UploadSource,
        ) -> Result<UploadedFile, ProviderError> {
            if self.fail {
                return Err(ProviderError::Api("HTTP 500".to_string()));
            }
            let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(UploadedFile {
                remote_uri: format!("https://files.example/{}", n),
                remote_unique_name: format!("files/{}", n),
                display_name: file.display_name.clone(),
                expiration_time: self.expires_in.map(|d| Utc::now() + d),
            })
        }

        async fn generate(
            &self,
            _api_key: &str,
            _params: &GenerateParams,
        ) -> Result<String, ProviderError> {
            Ok(String::new())
        }
    }

    fn credential() -> ResolvedCredential {
        ResolvedCredential {
            credential_id: "cred-1".to_string(),
            provider: AiProvider::Google,
            secret: "key".to_string(),
            source: CredentialSource::Owned,
        }
    }

    async fn setup() -> (ExternalFileCache, StoredFile, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("test.db")).await.unwrap();
        let file = SqliteFileStore::new(db.pool.clone())
            .register("owner", "/data/notes.pdf", "application/pdf", "notes.pdf")
            .await
            .unwrap();
        (ExternalFileCache::new(db.pool), file, temp_dir)
    }

    #[tokio::test]
    async fn test_second_call_is_cache_hit() {
        let (cache, file, _dir) = setup().await;
        let uploader = FakeUploader::new(Some(Duration::hours(48)));

        let first = cache.get_or_upload(&file, &credential(), &uploader).await.unwrap();
        let second = cache.get_or_upload(&file, &credential(), &uploader).await.unwrap();

        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(first.remote_uri, second.remote_uri);
    }

    #[tokio::test]
    async fn test_expired_entry_updated_in_place() {
        let (cache, file, _dir) = setup().await;
        let expired = FakeUploader::new(Some(Duration::seconds(-60)));
        let first = cache.get_or_upload(&file, &credential(), &expired).await.unwrap();
        assert!(cache.find_valid(&file.id, "cred-1").await.unwrap().is_none());

        let fresh = FakeUploader::new(Some(Duration::hours(48)));
        // Different counter, so the remote uri differs from the expired one
        fresh.uploads.store(10, Ordering::SeqCst);
        let second = cache.get_or_upload(&file, &credential(), &fresh).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_ne!(second.remote_uri, first.remote_uri);
        assert_eq!(cache.list_for_credential("cred-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_cache_untouched() {
        let (cache, file, _dir) = setup().await;
        let failing = FakeUploader {
            uploads: AtomicUsize::new(0),
            fail: true,
            expires_in: None,
        };

        let err = cache
            .get_or_upload(&file, &credential(), &failing)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::UploadFailed { .. }));
        assert!(err.is_retryable());
        assert!(cache.list_for_credential("cred-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_uploads_produce_one_row() {
        let (cache, file, _dir) = setup().await;
        let uploader = Arc::new(FakeUploader::new(None));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let file = file.clone();
            let uploader = uploader.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_upload(&file, &credential(), uploader.as_ref())
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }

        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 1);
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(cache.list_for_credential("cred-1").await.unwrap().len(), 1);
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_are_per_credential() {
        let (cache, file, _dir) = setup().await;
        let uploader = FakeUploader::new(None);
        let mut other = credential();
        other.credential_id = "cred-2".to_string();

        cache.get_or_upload(&file, &credential(), &uploader).await.unwrap();
        cache.get_or_upload(&file, &other, &uploader).await.unwrap();

        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.list_for_credential("cred-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_valid_entries() {
        let (cache, file, _dir) = setup().await;
        let expired = FakeUploader::new(Some(Duration::seconds(-60)));
        let never = FakeUploader::new(None);
        never.uploads.store(50, Ordering::SeqCst);
        let mut other = credential();
        other.credential_id = "cred-2".to_string();

        cache.get_or_upload(&file, &credential(), &expired).await.unwrap();
        cache.get_or_upload(&file, &other, &never).await.unwrap();

        assert_eq!(cache.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(cache.list_for_credential("cred-1").await.unwrap().is_empty());
        assert_eq!(cache.list_for_credential("cred-2").await.unwrap().len(), 1);
    }
}
