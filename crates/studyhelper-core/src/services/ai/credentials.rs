//! Credential storage layer
//!
//! Persists per-user provider API keys. Secrets are encrypted through the
//! injected `SecretCodec` before they reach SQLite.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::error::AiError;
use super::secret::SecretCodec;
use crate::models::{AiProvider, Credential, CredentialUpdate};

const CREDENTIAL_COLUMNS: &str =
    "id, user_id, provider, encrypted_secret, is_active, created_at, updated_at, last_used_at";

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
    codec: Arc<dyn SecretCodec>,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool, codec: Arc<dyn SecretCodec>) -> Self {
        Self { pool, codec }
    }

    /// Store a new credential for `user_id`. The plaintext is encrypted first.
    pub async fn create(
        &self,
        user_id: &str,
        provider: AiProvider,
        plaintext: &str,
        is_active: bool,
    ) -> Result<Credential, AiError> {
        let plaintext = plaintext.trim();
        if plaintext.is_empty() {
            return Err(AiError::Secret("API key must not be empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let encrypted = self.codec.encrypt(plaintext)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO credentials
            (id, user_id, provider, encrypted_secret, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(provider.as_str())
        .bind(&encrypted)
        .bind(is_active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        log::info!(
            "[ai:credentials] Created {} credential {} for user {}",
            provider,
            id,
            user_id
        );

        Ok(Credential {
            id,
            user_id: user_id.to_string(),
            provider: provider.as_str().to_string(),
            encrypted_secret: encrypted,
            is_active,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        })
    }

    /// List a user's credentials, optionally filtered by provider and active flag
    pub async fn list(
        &self,
        user_id: &str,
        provider: Option<AiProvider>,
        is_active: Option<bool>,
    ) -> Result<Vec<Credential>, AiError> {
        let mut sql = format!(
            "SELECT {} FROM credentials WHERE user_id = ?",
            CREDENTIAL_COLUMNS
        );
        if provider.is_some() {
            sql.push_str(" AND provider = ?");
        }
        if is_active.is_some() {
            sql.push_str(" AND is_active = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query_as::<_, Credential>(&sql).bind(user_id);
        if let Some(p) = provider {
            query = query.bind(p.as_str());
        }
        if let Some(active) = is_active {
            query = query.bind(active);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Get one credential, scoped to its owner
    pub async fn get(&self, user_id: &str, id: &str) -> Result<Option<Credential>, AiError> {
        let sql = format!(
            "SELECT {} FROM credentials WHERE id = ? AND user_id = ?",
            CREDENTIAL_COLUMNS
        );
        Ok(sqlx::query_as::<_, Credential>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Most recently created active credential owned by `user_id` for `provider`
    pub async fn find_active(
        &self,
        user_id: &str,
        provider: AiProvider,
    ) -> Result<Option<Credential>, AiError> {
        let sql = format!(
            r#"
            SELECT {} FROM credentials
            WHERE user_id = ? AND provider = ? AND is_active = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            CREDENTIAL_COLUMNS
        );
        Ok(sqlx::query_as::<_, Credential>(&sql)
            .bind(user_id)
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Whether the user owns any active credential
    pub async fn has_any_active(&self, user_id: &str) -> Result<bool, AiError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM credentials WHERE user_id = ? AND is_active = 1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Apply a partial update. Returns `None` when the credential does not
    /// exist or belongs to someone else.
    pub async fn update(
        &self,
        user_id: &str,
        id: &str,
        update: CredentialUpdate,
    ) -> Result<Option<Credential>, AiError> {
        let Some(mut credential) = self.get(user_id, id).await? else {
            return Ok(None);
        };

        if let Some(provider) = update.provider {
            credential.provider = provider.as_str().to_string();
        }
        if let Some(secret) = update.secret.as_deref() {
            let secret = secret.trim();
            if secret.is_empty() {
                return Err(AiError::Secret("API key must not be empty".to_string()));
            }
            credential.encrypted_secret = self.codec.encrypt(secret)?;
            log::info!("[ai:credentials] Rotated secret of credential {}", id);
        }
        if let Some(active) = update.is_active {
            credential.is_active = active;
        }
        credential.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE credentials
            SET provider = ?, encrypted_secret = ?, is_active = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&credential.provider)
        .bind(&credential.encrypted_secret)
        .bind(credential.is_active)
        .bind(credential.updated_at)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(Some(credential))
    }

    /// Delete a credential together with its provider file cache entries.
    ///
    /// Returns the number of cache entries removed, or `None` when the
    /// credential was not found for this user.
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<Option<u64>, AiError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM credentials WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let cache_deleted = sqlx::query("DELETE FROM file_cache WHERE credential_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM credentials WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        log::info!(
            "[ai:credentials] Deleted credential {} for user {} ({} cache entries)",
            id,
            user_id,
            cache_deleted
        );

        Ok(Some(cache_deleted))
    }

    /// Record a successful use. Last write wins.
    pub async fn touch_last_used(&self, id: &str) -> Result<(), AiError> {
        sqlx::query("UPDATE credentials SET last_used_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Make sure `user_id` has an active credential for `provider`, creating
    /// one from `plaintext` if not. Used to seed the shared free-tier account
    /// from a system key. Returns the credential and whether it was created.
    pub async fn ensure_credential(
        &self,
        user_id: &str,
        provider: AiProvider,
        plaintext: &str,
    ) -> Result<(Credential, bool), AiError> {
        if let Some(existing) = self.find_active(user_id, provider).await? {
            log::debug!(
                "[ai:credentials] User {} already has an active {} credential",
                user_id,
                provider
            );
            return Ok((existing, false));
        }
        let created = self.create(user_id, provider, plaintext, true).await?;
        Ok((created, true))
    }

    /// Decrypt a stored secret for handing to a provider client
    pub fn decrypt_secret(&self, credential: &Credential) -> Result<String, AiError> {
        self.codec.decrypt(&credential.encrypted_secret)
    }
}
