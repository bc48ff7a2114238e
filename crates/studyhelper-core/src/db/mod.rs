//! Database module - SQLx with SQLite

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Create a new database connection with default path
    pub async fn new() -> Result<Self> {
        let db_path = get_db_path()?;
        Self::open(db_path).await
    }

    /// Create a new database connection with a specific path
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        log::info!("Connecting to database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        log::info!("Running database migrations...");

        // Per-user provider credentials (secret stored as ciphertext)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                encrypted_secret TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_used_at DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_credentials_user_provider ON credentials(user_id, provider, is_active)",
        )
        .execute(&self.pool)
        .await?;

        // Lifetime free-tier usage per (user, provider)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_counters (
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
                last_used_at DATETIME,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, provider)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Locally stored files (read-only for the AI core)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS physical_files (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                path TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                display_name TEXT NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_file_access (
                user_id TEXT NOT NULL,
                file_id TEXT NOT NULL,
                access_level TEXT NOT NULL DEFAULT 'read',
                granted_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (file_id) REFERENCES physical_files(id),
                PRIMARY KEY (user_id, file_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Provider-side uploaded file handles. credential_id is not a foreign
        // key: the system default credential uses a synthetic id.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_cache (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                credential_id TEXT NOT NULL,
                remote_uri TEXT NOT NULL UNIQUE,
                remote_display_name TEXT NOT NULL,
                remote_unique_name TEXT NOT NULL UNIQUE,
                expiration_time DATETIME,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (file_id) REFERENCES physical_files(id),
                UNIQUE(file_id, credential_id, remote_uri)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One row per (file, credential): expired entries are updated in place
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_file_cache_file_credential ON file_cache(file_id, credential_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_cache_credential ON file_cache(credential_id)")
            .execute(&self.pool)
            .await?;

        log::info!("Database migrations completed");
        Ok(())
    }
}

/// Get database file path
/// Priority: STUDYHELPER_DB_PATH env var > default app data directory
pub fn get_db_path() -> Result<PathBuf> {
    // Check for environment variable override
    if let Ok(path) = std::env::var("STUDYHELPER_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    // Default: use app data directory
    let dirs = directories::ProjectDirs::from("com", "studyhelper", "StudyHelper")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;

    Ok(dirs.data_dir().join("studyhelper.db"))
}
