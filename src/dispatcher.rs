//! Scans the notification store and drives each eligible record through the
//! per-record pipeline: load user, deliver, retire.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, ScanMode, TotalFailurePolicy};
use crate::db::ScanFilter;
use crate::delivery::{DeliveryOutcome, DeliveryStrategy};
use crate::guard::{self, MarkResult};
use crate::model::NotificationRecord;
use crate::store::NotificationStore;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification query failed: {0:#}")]
    Store(anyhow::Error),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("failed to load user {user_id}: {cause:#}")]
    UserLookup {
        user_id: String,
        cause: anyhow::Error,
    },
    #[error("notification {0} not found")]
    NotificationNotFound(String),
    #[error("notification {id} has type {notification_type}; only welcome_email is processed")]
    UnsupportedType {
        id: String,
        notification_type: String,
    },
    #[error("failed to mark notification {id} processed (mail delivered: {delivered}): {cause:#}")]
    MarkFailed {
        id: String,
        delivered: bool,
        cause: anyhow::Error,
    },
}

/// What the pipeline did with one record.
#[derive(Debug)]
pub enum RecordOutcome {
    /// The record was retired. `delivery` is `None` when the user had no
    /// temporary password and nothing was sent.
    Completed {
        delivery: Option<DeliveryOutcome>,
        mark: MarkResult,
    },
    /// Neither tier could be attempted and the policy keeps the record for a
    /// later tick.
    Deferred { delivery: DeliveryOutcome },
}

#[derive(Debug)]
pub struct RecordError {
    pub notification_id: String,
    pub error: DispatchError,
}

/// Tally of one scan. Per-record failures are collected, never raised.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub fetched: usize,
    pub skipped_type: usize,
    pub skipped_processed: usize,
    /// Records retired during this scan.
    pub processed: usize,
    pub delivered: usize,
    pub without_credentials: usize,
    pub delivery_failed: usize,
    pub deferred: usize,
    pub errors: Vec<RecordError>,
}

impl ScanReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Completed { delivery, .. } => {
                self.processed += 1;
                match delivery {
                    None => self.without_credentials += 1,
                    Some(d) if d.is_delivered() => self.delivered += 1,
                    Some(_) => self.delivery_failed += 1,
                }
            }
            RecordOutcome::Deferred { .. } => {
                self.deferred += 1;
                self.delivery_failed += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub page_size: u32,
    pub sweep_page_size: u32,
    pub scan_mode: ScanMode,
    pub on_total_failure: TotalFailurePolicy,
}

impl DispatcherSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            page_size: cfg.app.page_size,
            sweep_page_size: cfg.app.sweep_page_size,
            scan_mode: cfg.app.scan_mode,
            on_total_failure: cfg.app.on_total_failure,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            sweep_page_size: 100,
            scan_mode: ScanMode::UnprocessedOnly,
            on_total_failure: TotalFailurePolicy::MarkProcessed,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    delivery: DeliveryStrategy,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        delivery: DeliveryStrategy,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            delivery,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// One tick: a bounded page of candidates. A larger backlog drains over
    /// later ticks.
    pub async fn scan(&self) -> Result<ScanReport, DispatchError> {
        self.scan_page(self.settings.page_size).await
    }

    /// Manual catch-up sweep over a larger page.
    pub async fn process_all_pending(&self) -> Result<ScanReport, DispatchError> {
        info!(limit = self.settings.sweep_page_size, "manual sweep of pending notifications");
        let report = self.scan_page(self.settings.sweep_page_size).await?;
        info!(processed = report.processed, "manual sweep finished");
        Ok(report)
    }

    /// Operator-triggered run of the pipeline for one record. Bypasses the
    /// processed filter so an already retired record can be resent.
    #[instrument(skip(self))]
    pub async fn process_one(&self, notification_id: &str) -> Result<RecordOutcome, DispatchError> {
        let notification = self
            .store
            .get_notification(notification_id)
            .await
            .map_err(DispatchError::Store)?
            .ok_or_else(|| DispatchError::NotificationNotFound(notification_id.to_string()))?;

        if !notification.is_welcome() {
            return Err(DispatchError::UnsupportedType {
                id: notification.id.clone(),
                notification_type: notification.notification_type.as_str().to_string(),
            });
        }
        if notification.processed {
            warn!("notification already processed; reprocessing on request");
        }
        self.process_record(&notification).await
    }

    #[instrument(skip(self))]
    async fn scan_page(&self, limit: u32) -> Result<ScanReport, DispatchError> {
        let candidates = match self.settings.scan_mode {
            ScanMode::UnprocessedOnly => self
                .store
                .scan_notifications(ScanFilter::Unprocessed, limit)
                .await
                .map_err(DispatchError::Store)?,
            ScanMode::Recent => self.first_pending_page(limit).await?,
        };

        let mut report = ScanReport {
            fetched: candidates.len(),
            ..Default::default()
        };

        for notification in &candidates {
            if !notification.is_welcome() {
                report.skipped_type += 1;
                continue;
            }
            if notification.processed {
                report.skipped_processed += 1;
                continue;
            }

            info!(
                notification_id = %notification.id,
                user_id = %notification.subject_user_id,
                "processing welcome notification"
            );
            match self.process_record(notification).await {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    warn!(notification_id = %notification.id, error = %err, "notification left unprocessed");
                    report.errors.push(RecordError {
                        notification_id: notification.id.clone(),
                        error: err,
                    });
                }
            }
        }

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                processed = report.processed,
                delivered = report.delivered,
                deferred = report.deferred,
                errors = report.errors.len(),
                "scan finished"
            );
        } else {
            debug!("scan found no candidates");
        }
        Ok(report)
    }

    /// Walk unfiltered pages oldest first and return the first one holding a
    /// pending welcome record, so fully retired pages never hide older work.
    async fn first_pending_page(&self, limit: u32) -> Result<Vec<NotificationRecord>, DispatchError> {
        let mut offset = 0u32;
        loop {
            let page = self
                .store
                .scan_notifications(ScanFilter::All { offset }, limit)
                .await
                .map_err(DispatchError::Store)?;
            if page.is_empty() || page.iter().any(|n| n.is_welcome() && !n.processed) {
                return Ok(page);
            }
            debug!(offset, "page fully retired; reading the next one");
            offset = offset.saturating_add(limit);
        }
    }

    /// Load the user, deliver, and retire the record.
    #[instrument(skip_all, fields(notification_id = %notification.id))]
    pub async fn process_record(
        &self,
        notification: &NotificationRecord,
    ) -> Result<RecordOutcome, DispatchError> {
        let user_id = &notification.subject_user_id;
        let user = match self.store.get_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(DispatchError::UserNotFound(user_id.clone())),
            Err(cause) => {
                return Err(DispatchError::UserLookup {
                    user_id: user_id.clone(),
                    cause,
                })
            }
        };

        let Some(password) = user.temporary_password.as_deref() else {
            info!(user_id = %user.id, "no temporary password; completing without mail");
            let mark = self.retire(&notification.id, false).await?;
            return Ok(RecordOutcome::Completed {
                delivery: None,
                mark,
            });
        };

        let delivery = self.delivery.deliver(&user, password).await;

        if let DeliveryOutcome::Failed { fallback_error, .. } = &delivery {
            let unattempted = !fallback_error.is_rejection();
            if unattempted && self.settings.on_total_failure == TotalFailurePolicy::LeaveUnprocessed
            {
                warn!(error = %fallback_error, "delivery unavailable on both tiers; leaving for retry");
                return Ok(RecordOutcome::Deferred { delivery });
            }
            error!(error = %fallback_error, "delivery failed on both tiers; marking processed anyway");
        }

        let mark = self.retire(&notification.id, delivery.is_delivered()).await?;
        Ok(RecordOutcome::Completed {
            delivery: Some(delivery),
            mark,
        })
    }

    async fn retire(&self, id: &str, delivered: bool) -> Result<MarkResult, DispatchError> {
        guard::mark_processed(self.store.as_ref(), id)
            .await
            .map_err(|cause| {
                if delivered {
                    error!(notification_id = id, error = %cause, "mail sent but mark-processed failed; the next scan will send again");
                }
                DispatchError::MarkFailed {
                    id: id.to_string(),
                    delivered,
                    cause,
                }
            })
    }
}
