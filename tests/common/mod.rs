#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use welcome_dispatch::config::{self, Config};
use welcome_dispatch::db::{self, Pool, ScanFilter};
use welcome_dispatch::dispatcher::Dispatcher;
use welcome_dispatch::identity::{IdentityError, IdentityProvider, IdentityUser};
use welcome_dispatch::mailer::{MailError, MailTransport, OutgoingMail};
use welcome_dispatch::model::{MailHistoryEntry, NotificationRecord, NotificationType, UserRecord};
use welcome_dispatch::services::build_dispatcher;
use welcome_dispatch::store::{NotificationStore, SqliteStore};
use welcome_dispatch::templates::TemplateSet;

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn test_config() -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.app.database_url = "sqlite::memory:".into();
    cfg.smtp.dry_run = true;
    config::validate(&cfg).unwrap();
    cfg
}

/// Identity provider that keeps accounts in memory and logs every call.
#[derive(Default)]
pub struct FakeIdentity {
    accounts: Mutex<HashMap<String, IdentityUser>>,
    calls: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub fail_link: AtomicBool,
    pub fail_claims: AtomicBool,
}

impl FakeIdentity {
    pub async fn add_account(&self, uid: &str, email: &str) {
        self.accounts.lock().await.insert(
            email.to_string(),
            IdentityUser {
                uid: uid.to_string(),
                email: email.to_string(),
                display_name: None,
                email_verified: false,
            },
        );
    }

    pub async fn has_account(&self, email: &str) -> bool {
        self.accounts.lock().await.contains_key(email)
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn log(&self, call: String) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn get_user_by_email(&self, email: &str) -> Result<IdentityUser, IdentityError> {
        self.log(format!("lookup:{email}")).await;
        self.accounts
            .lock()
            .await
            .get(email)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(email.to_string()))
    }

    async fn create_user(
        &self,
        email: &str,
        _password: &str,
        display_name: &str,
    ) -> Result<IdentityUser, IdentityError> {
        self.log(format!("create:{email}")).await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(IdentityError::Api {
                status: 400,
                message: "EMAIL_EXISTS".into(),
            });
        }
        let mut accounts = self.accounts.lock().await;
        let user = IdentityUser {
            uid: format!("uid-{}", accounts.len() + 1),
            email: email.to_string(),
            display_name: Some(display_name.to_string()),
            email_verified: false,
        };
        accounts.insert(email.to_string(), user.clone());
        Ok(user)
    }

    async fn issue_verification_link(
        &self,
        email: &str,
        _continue_url: &str,
    ) -> Result<String, IdentityError> {
        self.log(format!("link:{email}")).await;
        if self.fail_link.load(Ordering::SeqCst) {
            return Err(IdentityError::Api {
                status: 500,
                message: "INTERNAL_ERROR".into(),
            });
        }
        Ok(format!("https://id.example.com/verify/{email}"))
    }

    async fn set_custom_claims(&self, uid: &str, _claims: &Value) -> Result<(), IdentityError> {
        self.log(format!("claims:{uid}")).await;
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(IdentityError::Api {
                status: 403,
                message: "PERMISSION_DENIED".into(),
            });
        }
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError> {
        self.log(format!("delete:{uid}")).await;
        self.accounts.lock().await.retain(|_, u| u.uid != uid);
        Ok(())
    }

    async fn ping(&self) -> Result<(), IdentityError> {
        Ok(())
    }
}

/// Mail transport that records every attempt and answers from a queue
/// (success once the queue is empty).
#[derive(Default)]
pub struct RecordingMailer {
    responses: Mutex<VecDeque<Result<(), MailError>>>,
    attempts: Mutex<Vec<OutgoingMail>>,
    delay: Option<Duration>,
}

impl RecordingMailer {
    pub fn with_responses(responses: Vec<Result<(), MailError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub async fn attempts(&self) -> Vec<OutgoingMail> {
        self.attempts.lock().await.clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.attempts.lock().await.push(mail.clone());
        self.responses.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn test_connection(&self) -> Result<(), MailError> {
        Ok(())
    }
}

/// SQLite store with switchable failures and a log of user reads.
pub struct FlakyStore {
    inner: SqliteStore,
    pub fail_scan: AtomicBool,
    pub fail_mark: AtomicBool,
    pub fail_history: AtomicBool,
    failing_users: Mutex<HashSet<String>>,
    user_reads: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            inner: SqliteStore::new(pool),
            fail_scan: AtomicBool::new(false),
            fail_mark: AtomicBool::new(false),
            fail_history: AtomicBool::new(false),
            failing_users: Mutex::new(HashSet::new()),
            user_reads: Mutex::new(Vec::new()),
        }
    }

    pub async fn fail_user(&self, id: &str) {
        self.failing_users.lock().await.insert(id.to_string());
    }

    pub async fn user_reads(&self) -> Vec<String> {
        self.user_reads.lock().await.clone()
    }
}

#[async_trait]
impl NotificationStore for FlakyStore {
    async fn scan_notifications(
        &self,
        filter: ScanFilter,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(anyhow!("store unreachable"));
        }
        self.inner.scan_notifications(filter, limit).await
    }

    async fn get_notification(&self, id: &str) -> Result<Option<NotificationRecord>> {
        self.inner.get_notification(id).await
    }

    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        self.user_reads.lock().await.push(id.to_string());
        if self.failing_users.lock().await.contains(id) {
            return Err(anyhow!("deadline exceeded"));
        }
        self.inner.get_user(id).await
    }

    async fn mark_processed(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        if self.fail_mark.load(Ordering::SeqCst) {
            return Err(anyhow!("update rejected"));
        }
        self.inner.mark_processed(id, at).await
    }

    async fn append_mail_history(&self, entry: &MailHistoryEntry) -> Result<String> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(anyhow!("history collection unavailable"));
        }
        self.inner.append_mail_history(entry).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

pub struct Harness {
    pub pool: Pool,
    pub store: Arc<FlakyStore>,
    pub identity: Arc<FakeIdentity>,
    pub mailer: Arc<RecordingMailer>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(test_config(), RecordingMailer::default()).await
    }

    pub async fn with_config(cfg: Config) -> Self {
        Self::build(cfg, RecordingMailer::default()).await
    }

    pub async fn with_mailer(mailer: RecordingMailer) -> Self {
        Self::build(test_config(), mailer).await
    }

    pub async fn build(cfg: Config, mailer: RecordingMailer) -> Self {
        let pool = setup_pool().await;
        let store = Arc::new(FlakyStore::new(pool.clone()));
        let identity = Arc::new(FakeIdentity::default());
        let mailer = Arc::new(mailer);
        let dispatcher = build_dispatcher(
            &cfg,
            store.clone(),
            identity.clone(),
            mailer.clone(),
            TemplateSet::builtin().unwrap(),
        );
        Self {
            pool,
            store,
            identity,
            mailer,
            dispatcher,
        }
    }

    pub async fn seed_user(&self, id: &str, email: &str, password: Option<&str>, role: &str) {
        db::upsert_user(
            &self.pool,
            &UserRecord {
                id: id.into(),
                email: email.into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                role: role.into(),
                temporary_password: password.map(str::to_string),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    }

    /// Insert a welcome notification created `age_secs` seconds ago.
    pub async fn seed_welcome(&self, id: &str, user_id: &str, age_secs: i64) {
        let mut record = NotificationRecord::welcome(id, user_id);
        record.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
        db::insert_notification(&self.pool, &record).await.unwrap();
    }

    pub async fn seed_processed(&self, id: &str, user_id: &str, age_secs: i64) {
        let mut record = NotificationRecord::welcome(id, user_id);
        record.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
        record.processed = true;
        record.processed_at = Some(Utc::now());
        db::insert_notification(&self.pool, &record).await.unwrap();
    }

    pub async fn seed_typed(&self, id: &str, user_id: &str, notification_type: &str) {
        let mut record = NotificationRecord::welcome(id, user_id);
        record.notification_type = NotificationType::parse(notification_type);
        db::insert_notification(&self.pool, &record).await.unwrap();
    }

    pub async fn notification(&self, id: &str) -> NotificationRecord {
        db::get_notification(&self.pool, id).await.unwrap().unwrap()
    }
}
