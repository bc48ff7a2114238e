//! File store seam
//!
//! The AI core only reads from the file store: where a file lives, what it
//! is, and whether a user may read it.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::error::AiError;
use crate::models::StoredFile;

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Look up a file by id
    async fn get_file(&self, file_id: &str) -> Result<Option<StoredFile>, AiError>;

    /// Whether `user_id` may read `file_id`
    async fn has_read_access(&self, user_id: &str, file_id: &str) -> Result<bool, AiError>;
}

/// File store over the `physical_files` / `user_file_access` tables
#[derive(Clone)]
pub struct SqliteFileStore {
    pool: SqlitePool,
}

impl SqliteFileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a file that already exists on disk
    pub async fn register(
        &self,
        owner_id: &str,
        path: &str,
        mime_type: &str,
        display_name: &str,
    ) -> Result<StoredFile, AiError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO physical_files (id, owner_id, path, mime_type, display_name) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(path)
        .bind(mime_type)
        .bind(display_name)
        .execute(&self.pool)
        .await?;

        log::info!("[ai:files] Registered file {} ({}) for {}", id, display_name, owner_id);

        Ok(StoredFile {
            id,
            owner_id: owner_id.to_string(),
            path: path.to_string(),
            mime_type: mime_type.to_string(),
            display_name: display_name.to_string(),
        })
    }

    /// Grant read access to a user other than the owner
    pub async fn grant_read(&self, user_id: &str, file_id: &str) -> Result<(), AiError> {
        sqlx::query(
            r#"
            INSERT INTO user_file_access (user_id, file_id, access_level)
            VALUES (?, ?, 'read')
            ON CONFLICT(user_id, file_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FileStore for SqliteFileStore {
    async fn get_file(&self, file_id: &str) -> Result<Option<StoredFile>, AiError> {
        Ok(sqlx::query_as::<_, StoredFile>(
            "SELECT id, owner_id, path, mime_type, display_name FROM physical_files WHERE id = ?",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn has_read_access(&self, user_id: &str, file_id: &str) -> Result<bool, AiError> {
        // Owner always has access; everyone else needs an explicit grant
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM physical_files f
            WHERE f.id = ?
              AND (f.owner_id = ?
                   OR EXISTS (SELECT 1 FROM user_file_access a
                              WHERE a.file_id = f.id AND a.user_id = ?))
            "#,
        )
        .bind(file_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}
