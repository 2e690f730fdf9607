//! Row mapping for the repository.
//!
//! Keep these functions focused on turning SQLite rows into the domain
//! records from `crate::model`. Business logic should live in higher layers.

use crate::model::{MailHistoryEntry, MailStatus, NotificationRecord, NotificationType, UserRecord};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Candidate filter for a bounded notification scan. Both variants return
/// rows oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFilter {
    /// Only rows with `processed = 0`.
    Unprocessed,
    /// Any row, skipping the first `offset` rows.
    All { offset: u32 },
}

pub(crate) fn notification_from_row(row: &SqliteRow) -> Result<NotificationRecord> {
    let raw_type: String = row.try_get("notification_type")?;
    Ok(NotificationRecord {
        id: row.try_get("notification_id")?,
        subject_user_id: row.try_get("subject_user_id")?,
        notification_type: NotificationType::parse(&raw_type),
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        is_read: row.try_get("is_read")?,
        read_at: row.try_get::<Option<DateTime<Utc>>, _>("read_at")?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get::<Option<DateTime<Utc>>, _>("processed_at")?,
    })
}

pub(crate) fn user_from_row(row: &SqliteRow) -> Result<UserRecord> {
    Ok(UserRecord {
        id: row.try_get("business_user_id")?,
        email: row.try_get("email_address")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: row.try_get("role")?,
        // An empty string is treated the same as a missing password.
        temporary_password: row
            .try_get::<Option<String>, _>("temporary_password")?
            .filter(|s| !s.is_empty()),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

pub(crate) fn mail_from_row(row: &SqliteRow) -> Result<MailHistoryEntry> {
    let raw_status: String = row.try_get("status")?;
    let status = MailStatus::parse_status(&raw_status)
        .ok_or_else(|| anyhow!("mail has unknown status {}", raw_status))?;
    let raw_attachments: String = row.try_get("attachments")?;
    Ok(MailHistoryEntry {
        mail_id: row.try_get("mail_id")?,
        user_id: row.try_get("user_id")?,
        recipient_id: row.try_get("recipient_id")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        status,
        attachments: serde_json::from_str(&raw_attachments).unwrap_or_default(),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        sent_at: row.try_get::<Option<DateTime<Utc>>, _>("sent_at")?,
    })
}
