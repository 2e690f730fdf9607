use super::model::{mail_from_row, notification_from_row, user_from_row, ScanFilter};
use crate::model::{MailHistoryEntry, NotificationRecord, UserRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{instrument, warn};
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // A private in-memory database only exists on the connection that made it.
    let max_connections = if normalized.starts_with("sqlite::memory") {
        1
    } else {
        5
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form, and let sqlx create the file on first run.
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn ping(pool: &Pool) -> Result<()> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .context("store ping failed")?;
    Ok(())
}

const NOTIFICATION_COLUMNS: &str = "notification_id, subject_user_id, notification_type, title, body, \
     created_at, is_read, read_at, processed, processed_at";

/// Bounded scan of notifications, oldest first. Rows that fail to decode are
/// logged and skipped so one malformed record cannot sink the page.
#[instrument(skip_all)]
pub async fn scan_notifications(
    pool: &Pool,
    filter: ScanFilter,
    limit: u32,
) -> Result<Vec<NotificationRecord>> {
    let (sql, offset) = match filter {
        ScanFilter::Unprocessed => (
            format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE processed = 0 \
                 ORDER BY datetime(created_at) ASC, notification_id ASC LIMIT ? OFFSET ?"
            ),
            0,
        ),
        ScanFilter::All { offset } => (
            format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
                 ORDER BY datetime(created_at) ASC, notification_id ASC LIMIT ? OFFSET ?"
            ),
            offset,
        ),
    };
    let rows = sqlx::query(&sql)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(pool)
        .await
        .context("failed to scan notifications")?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        match notification_from_row(row) {
            Ok(record) => records.push(record),
            Err(err) => {
                let id = row
                    .try_get::<String, _>("notification_id")
                    .unwrap_or_else(|_| "<unreadable>".into());
                warn!(notification_id = %id, error = %err, "skipping malformed notification row");
            }
        }
    }
    Ok(records)
}

#[instrument(skip_all)]
pub async fn get_notification(pool: &Pool, id: &str) -> Result<Option<NotificationRecord>> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE notification_id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(notification_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn insert_notification(pool: &Pool, record: &NotificationRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO notifications (notification_id, subject_user_id, notification_type, title, body, \
         created_at, is_read, read_at, processed, processed_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.subject_user_id)
    .bind(record.notification_type.as_str())
    .bind(&record.title)
    .bind(&record.body)
    .bind(record.created_at)
    .bind(record.is_read)
    .bind(record.read_at)
    .bind(record.processed)
    .bind(record.processed_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to insert notification {}", record.id))?;
    Ok(())
}

/// Retire a notification. Only flips rows that are still unprocessed, so a
/// stale or repeated call is a no-op and returns `false`.
#[instrument(skip_all)]
pub async fn mark_notification_processed(
    pool: &Pool,
    id: &str,
    processed_at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE notifications SET processed = 1, processed_at = ? \
         WHERE notification_id = ? AND processed = 0",
    )
    .bind(processed_at)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark notification processed")?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn count_unprocessed_notifications(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE processed = 0 AND notification_type = 'welcome_email'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn get_user(pool: &Pool, id: &str) -> Result<Option<UserRecord>> {
    let row = sqlx::query(
        "SELECT business_user_id, first_name, last_name, email_address, role, temporary_password, created_at \
         FROM users WHERE business_user_id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(user_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn upsert_user(pool: &Pool, user: &UserRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (business_user_id, first_name, last_name, email_address, role, temporary_password, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(business_user_id) DO UPDATE SET first_name = excluded.first_name, \
         last_name = excluded.last_name, email_address = excluded.email_address, role = excluded.role, \
         temporary_password = excluded.temporary_password",
    )
    .bind(&user.id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&user.role)
    .bind(user.temporary_password.as_deref())
    .bind(user.created_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert user {}", user.id))?;
    Ok(())
}

/// Append a send-history row. Generates `mail_id` when the entry has none and
/// returns the ID that was stored.
#[instrument(skip_all)]
pub async fn insert_mail_history(pool: &Pool, entry: &MailHistoryEntry) -> Result<String> {
    let mail_id = if entry.mail_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        entry.mail_id.clone()
    };
    let attachments = serde_json::to_string(&entry.attachments)?;
    sqlx::query(
        "INSERT INTO mails (mail_id, user_id, recipient_id, subject, body, status, attachments, created_at, sent_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&mail_id)
    .bind(&entry.user_id)
    .bind(&entry.recipient_id)
    .bind(&entry.subject)
    .bind(&entry.body)
    .bind(entry.status.as_str())
    .bind(attachments)
    .bind(entry.created_at)
    .bind(entry.sent_at)
    .execute(pool)
    .await
    .context("failed to persist mail history")?;
    Ok(mail_id)
}

/// Most recent history rows recorded by `user_id`.
#[instrument(skip_all)]
pub async fn list_mail_history(
    pool: &Pool,
    user_id: &str,
    limit: u32,
) -> Result<Vec<MailHistoryEntry>> {
    let rows = sqlx::query(
        "SELECT mail_id, user_id, recipient_id, subject, body, status, attachments, created_at, sent_at \
         FROM mails WHERE user_id = ? ORDER BY datetime(created_at) DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(mail_from_row).collect()
}
