//! Free-tier usage tracking
//!
//! One lifetime counter per (user, provider). The counter only moves up, and
//! only after a successful generation served by a credential the user does not
//! own. There is no reset: the limit is a one-time cap.

use chrono::Utc;
use sqlx::SqlitePool;

use super::error::AiError;
use crate::config::AiConfig;
use crate::models::{AiProvider, ProviderUsage, QuotaCounter, UsageSummary};

#[derive(Clone)]
pub struct UsageQuotaTracker {
    pool: SqlitePool,
}

impl UsageQuotaTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the counter, creating it at zero on first access
    pub async fn get_or_create(
        &self,
        user_id: &str,
        provider: AiProvider,
    ) -> Result<QuotaCounter, AiError> {
        sqlx::query(
            r#"
            INSERT INTO quota_counters (user_id, provider, count)
            VALUES (?, ?, 0)
            ON CONFLICT(user_id, provider) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;

        let counter = sqlx::query_as::<_, QuotaCounter>(
            "SELECT user_id, provider, count, last_used_at FROM quota_counters WHERE user_id = ? AND provider = ?",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(counter)
    }

    /// Read the counter without creating it
    pub async fn get(
        &self,
        user_id: &str,
        provider: AiProvider,
    ) -> Result<Option<QuotaCounter>, AiError> {
        Ok(sqlx::query_as::<_, QuotaCounter>(
            "SELECT user_id, provider, count, last_used_at FROM quota_counters WHERE user_id = ? AND provider = ?",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Atomically add one use and refresh `last_used_at`.
    ///
    /// A single upsert statement, so concurrent increments for the same pair
    /// are serialized by SQLite and none is lost. Returns the new count.
    pub async fn increment(&self, user_id: &str, provider: AiProvider) -> Result<i64, AiError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO quota_counters (user_id, provider, count, last_used_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(user_id, provider)
            DO UPDATE SET count = count + 1, last_used_at = excluded.last_used_at
            RETURNING count
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        log::debug!(
            "[ai:usage] Incremented free tier usage for user {} provider {} to {}",
            user_id,
            provider,
            count
        );

        Ok(count)
    }

    /// Per-provider usage with limits applied, for display
    pub async fn summary(
        &self,
        user_id: &str,
        config: &AiConfig,
        has_own_keys: bool,
    ) -> Result<UsageSummary, AiError> {
        let mut providers = Vec::with_capacity(AiProvider::ALL.len());
        for provider in AiProvider::ALL {
            let counter = self.get(user_id, provider).await?;
            let (count, last_used_at) = counter
                .map(|c| (c.count, c.last_used_at))
                .unwrap_or((0, None));
            providers.push(ProviderUsage::new(
                provider,
                count,
                config.free_tier_limit(provider),
                last_used_at,
            ));
        }

        Ok(UsageSummary {
            user_id: user_id.to_string(),
            providers,
            has_own_keys,
        })
    }
}
