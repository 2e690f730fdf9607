//! Connectivity checks for the store, the mail server and the identity provider.

use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

use crate::identity::IdentityProvider;
use crate::mailer::MailTransport;
use crate::store::NotificationStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub component: &'static str,
    pub ok: bool,
    pub detail: String,
    pub elapsed_ms: u128,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.ok { "ok" } else { "FAIL" };
        write!(
            f,
            "{:<9} {:<4} {:>5}ms  {}",
            self.component, status, self.elapsed_ms, self.detail
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(|p| p.ok)
    }
}

fn finish<E: fmt::Display>(
    component: &'static str,
    started: Instant,
    res: Result<(), E>,
) -> CheckResult {
    let elapsed_ms = started.elapsed().as_millis();
    match res {
        Ok(()) => {
            info!(component, elapsed_ms, "check ok");
            CheckResult {
                component,
                ok: true,
                detail: "reachable".into(),
                elapsed_ms,
            }
        }
        Err(err) => {
            warn!(component, elapsed_ms, error = %err, "check failed");
            CheckResult {
                component,
                ok: false,
                detail: err.to_string(),
                elapsed_ms,
            }
        }
    }
}

pub async fn check_store(store: &dyn NotificationStore) -> CheckResult {
    let started = Instant::now();
    let res = store.ping().await.map_err(|e| format!("{e:#}"));
    finish("store", started, res)
}

pub async fn check_mail(mailer: &dyn MailTransport) -> CheckResult {
    let started = Instant::now();
    finish("smtp", started, mailer.test_connection().await)
}

pub async fn check_identity(identity: &dyn IdentityProvider) -> CheckResult {
    let started = Instant::now();
    finish("identity", started, identity.ping().await)
}

/// Run every check in turn. One failing check does not stop the others.
pub async fn check_all(
    store: &dyn NotificationStore,
    mailer: &dyn MailTransport,
    identity: &dyn IdentityProvider,
) -> HealthReport {
    HealthReport {
        checks: vec![
            check_store(store).await,
            check_mail(mailer).await,
            check_identity(identity).await,
        ],
    }
}
