//! Document store contract used by the dispatcher, plus the SQLite-backed
//! implementation.

use crate::db::{self, Pool, ScanFilter};
use crate::model::{MailHistoryEntry, NotificationRecord, UserRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Bounded scan of the notifications collection.
    async fn scan_notifications(
        &self,
        filter: ScanFilter,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>>;

    async fn get_notification(&self, id: &str) -> Result<Option<NotificationRecord>>;

    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>>;

    /// Set `processed = true` and `processed_at = at`. Returns `false` when the
    /// record was already processed (or is gone), which callers treat as a no-op.
    async fn mark_processed(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Create a history entry under a generated ID and return that ID.
    async fn append_mail_history(&self, entry: &MailHistoryEntry) -> Result<String>;

    async fn ping(&self) -> Result<()>;
}

/// `NotificationStore` over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn scan_notifications(
        &self,
        filter: ScanFilter,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>> {
        db::scan_notifications(&self.pool, filter, limit).await
    }

    async fn get_notification(&self, id: &str) -> Result<Option<NotificationRecord>> {
        db::get_notification(&self.pool, id).await
    }

    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        db::get_user(&self.pool, id).await
    }

    async fn mark_processed(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        db::mark_notification_processed(&self.pool, id, at).await
    }

    async fn append_mail_history(&self, entry: &MailHistoryEntry) -> Result<String> {
        db::insert_mail_history(&self.pool, entry).await
    }

    async fn ping(&self) -> Result<()> {
        db::ping(&self.pool).await
    }
}
