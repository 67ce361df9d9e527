//! # Sync Cursors
//!
//! Durable per-(user, provider) subscription and change-cursor records.
//!
//! Subscription lifecycle:
//!
//! ```text
//!   (none) ──establish──▶ active ──commit/renew──▶ active
//!                           │
//!                           └──deactivate / provider expiry──▶ inactive
//! ```
//!
//! Writes are last-write-wins. Two overlapping notifications for the same
//! user can commit out of order; the store does not serialize them.

use crate::error::StoreError;
use crate::sync::ProviderKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::fmt;
use tracing::{debug, info};

/// Stored cursor and subscription state for one mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub user_id: String,
    pub provider: ProviderKind,
    pub cursor_token: String,
    pub subscription_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_notification_at: Option<DateTime<Utc>>,
    pub notification_count: i64,
}

impl SyncCursor {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Durable cursor storage
#[async_trait]
pub trait CursorStore: Send + Sync + fmt::Debug {
    async fn load(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<SyncCursor>, StoreError>;

    /// Create or reactivate the subscription at `cursor_token`
    async fn establish(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SyncCursor, StoreError>;

    /// Advance the cursor. With `notified_at`, also count a notification.
    async fn commit(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor_token: &str,
        notified_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn renew(
        &self,
        user_id: &str,
        provider: ProviderKind,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn deactivate(&self, user_id: &str, provider: ProviderKind) -> Result<(), StoreError>;

    async fn list_active(&self) -> Result<Vec<SyncCursor>, StoreError>;
}

fn missing(user_id: &str, provider: ProviderKind) -> StoreError {
    StoreError::InvalidRecord(format!("no subscription for {user_id}/{provider}"))
}

/// Process-local cursor store for tests and single-instance development
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: DashMap<(String, ProviderKind), SyncCursor>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, provider: ProviderKind) -> (String, ProviderKind) {
        (user_id.to_string(), provider)
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<SyncCursor>, StoreError> {
        Ok(self
            .cursors
            .get(&Self::key(user_id, provider))
            .map(|cursor| cursor.clone()))
    }

    async fn establish(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SyncCursor, StoreError> {
        let mut entry = self
            .cursors
            .entry(Self::key(user_id, provider))
            .or_insert_with(|| SyncCursor {
                user_id: user_id.to_string(),
                provider,
                cursor_token: cursor_token.to_string(),
                subscription_active: true,
                expires_at: None,
                last_notification_at: None,
                notification_count: 0,
            });

        entry.cursor_token = cursor_token.to_string();
        entry.subscription_active = true;
        entry.expires_at = Some(expires_at);
        Ok(entry.clone())
    }

    async fn commit(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor_token: &str,
        notified_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut cursor = self
            .cursors
            .get_mut(&Self::key(user_id, provider))
            .ok_or_else(|| missing(user_id, provider))?;

        cursor.cursor_token = cursor_token.to_string();
        if let Some(at) = notified_at {
            cursor.last_notification_at = Some(at);
            cursor.notification_count += 1;
        }
        Ok(())
    }

    async fn renew(
        &self,
        user_id: &str,
        provider: ProviderKind,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut cursor = self
            .cursors
            .get_mut(&Self::key(user_id, provider))
            .ok_or_else(|| missing(user_id, provider))?;

        cursor.expires_at = Some(expires_at);
        Ok(())
    }

    async fn deactivate(&self, user_id: &str, provider: ProviderKind) -> Result<(), StoreError> {
        if let Some(mut cursor) = self.cursors.get_mut(&Self::key(user_id, provider)) {
            cursor.subscription_active = false;
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SyncCursor>, StoreError> {
        let mut active: Vec<SyncCursor> = self
            .cursors
            .iter()
            .filter(|cursor| cursor.subscription_active)
            .map(|cursor| cursor.clone())
            .collect();
        active.sort_by(|a, b| (&a.user_id, a.provider.as_str()).cmp(&(&b.user_id, b.provider.as_str())));
        Ok(active)
    }
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    user_id: String,
    provider: String,
    cursor_token: String,
    subscription_active: bool,
    expires_at: Option<DateTime<Utc>>,
    last_notification_at: Option<DateTime<Utc>>,
    notification_count: i64,
}

impl TryFrom<CursorRow> for SyncCursor {
    type Error = StoreError;

    fn try_from(row: CursorRow) -> Result<Self, Self::Error> {
        let provider = row.provider.parse::<ProviderKind>().map_err(|_| {
            StoreError::InvalidRecord(format!("unknown provider '{}'", row.provider))
        })?;

        Ok(SyncCursor {
            user_id: row.user_id,
            provider,
            cursor_token: row.cursor_token,
            subscription_active: row.subscription_active,
            expires_at: row.expires_at,
            last_notification_at: row.last_notification_at,
            notification_count: row.notification_count,
        })
    }
}

const SELECT_COLUMNS: &str = "user_id, provider, cursor_token, subscription_active, \
                              expires_at, last_notification_at, notification_count";

/// PostgreSQL cursor store (`sync_cursors` table)
#[derive(Debug, Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to PostgreSQL: {e}")))?;

        info!("PostgreSQL cursor store connected");
        Ok(Self { pool })
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Cursor store migration failed: {e}")))?;

        debug!("Cursor store schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<SyncCursor>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sync_cursors WHERE user_id = $1 AND provider = $2"
        );
        let row = sqlx::query_as::<_, CursorRow>(&sql)
            .bind(user_id)
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncCursor::try_from).transpose()
    }

    async fn establish(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SyncCursor, StoreError> {
        let sql = format!(
            "INSERT INTO sync_cursors (user_id, provider, cursor_token, subscription_active, expires_at) \
             VALUES ($1, $2, $3, TRUE, $4) \
             ON CONFLICT (user_id, provider) DO UPDATE SET \
                 cursor_token = EXCLUDED.cursor_token, \
                 subscription_active = TRUE, \
                 expires_at = EXCLUDED.expires_at, \
                 updated_at = NOW() \
             RETURNING {SELECT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CursorRow>(&sql)
            .bind(user_id)
            .bind(provider.as_str())
            .bind(cursor_token)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;

        SyncCursor::try_from(row)
    }

    async fn commit(
        &self,
        user_id: &str,
        provider: ProviderKind,
        cursor_token: &str,
        notified_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sync_cursors SET \
                 cursor_token = $3, \
                 last_notification_at = COALESCE($4, last_notification_at), \
                 notification_count = notification_count + CASE WHEN $4 IS NULL THEN 0 ELSE 1 END, \
                 updated_at = NOW() \
             WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(cursor_token)
        .bind(notified_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(missing(user_id, provider));
        }
        Ok(())
    }

    async fn renew(
        &self,
        user_id: &str,
        provider: ProviderKind,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sync_cursors SET expires_at = $3, updated_at = NOW() \
             WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(missing(user_id, provider));
        }
        Ok(())
    }

    async fn deactivate(&self, user_id: &str, provider: ProviderKind) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_cursors SET subscription_active = FALSE, updated_at = NOW() \
             WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SyncCursor>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sync_cursors \
             WHERE subscription_active ORDER BY user_id, provider"
        );
        let rows = sqlx::query_as::<_, CursorRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SyncCursor::try_from).collect()
    }
}
