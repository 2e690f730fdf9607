//! The processed / processed-at transition that retires a notification.
//!
//! This write is independent of the delivery side effect. A crash after a
//! successful send and before this update leaves the record eligible, and the
//! next scan sends again.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, instrument};

use crate::store::NotificationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    Marked,
    /// The store had nothing to flip: the record was already processed or is gone.
    AlreadyProcessed,
}

/// Set `processed = true`, `processed_at = now` on `notification_id`.
#[instrument(skip(store))]
pub async fn mark_processed(
    store: &dyn NotificationStore,
    notification_id: &str,
) -> Result<MarkResult> {
    let changed = store.mark_processed(notification_id, Utc::now()).await?;
    if changed {
        Ok(MarkResult::Marked)
    } else {
        debug!("stale mark-processed ignored");
        Ok(MarkResult::AlreadyProcessed)
    }
}
