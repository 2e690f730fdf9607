//! Periodic driver around the dispatcher.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::dispatcher::{DispatchError, Dispatcher, RecordOutcome, ScanReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Ticking,
    Stopped,
}

/// Runs a scan immediately and then once per interval until told to stop.
///
/// Ticks never overlap: the next sleep starts only after the previous scan
/// returns. A stop request observed mid-scan takes effect once that scan
/// finishes.
pub struct Poller {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    state: watch::Sender<PollerState>,
}

impl Poller {
    pub fn new(dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            dispatcher,
            interval,
            state,
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Loop until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "notification poller started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.state.send_replace(PollerState::Ticking);
            self.tick().await;
            self.state.send_replace(PollerState::Idle);

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.state.send_replace(PollerState::Stopped);
        info!("notification poller stopped");
    }

    #[instrument(skip_all)]
    async fn tick(&self) {
        // A failed scan is retried on the next tick.
        if let Err(err) = self.dispatcher.scan().await {
            error!(error = %err, "notification scan failed");
        }
    }

    pub async fn process_one(&self, notification_id: &str) -> Result<RecordOutcome, DispatchError> {
        self.dispatcher.process_one(notification_id).await
    }

    pub async fn process_all_pending(&self) -> Result<ScanReport, DispatchError> {
        self.dispatcher.process_all_pending().await
    }
}
