//! Two-tier delivery: a personalized verification mail, falling back to a
//! generic welcome mail when anything in the first tier fails.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::identity::{IdentityError, IdentityProvider, IdentityUser};
use crate::mailer::{BodyFormat, MailError, MailTransport, OutgoingMail};
use crate::model::{MailHistoryEntry, MailStatus, UserRecord};
use crate::store::NotificationStore;
use crate::templates::{MailContext, RenderedMail, TemplateError, TemplateSet};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl DeliveryError {
    /// The recipient was refused, as opposed to the attempt never being made.
    pub fn is_rejection(&self) -> bool {
        matches!(self, DeliveryError::Mail(err) if err.is_rejection())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Primary,
    Fallback,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Primary => "primary",
            Channel::Fallback => "fallback",
        }
    }
}

/// Result of one delivery attempt sequence. Not persisted.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Primary,
    Fallback {
        primary_error: DeliveryError,
    },
    Failed {
        primary_error: DeliveryError,
        fallback_error: DeliveryError,
    },
}

impl DeliveryOutcome {
    pub fn channel(&self) -> Option<Channel> {
        match self {
            DeliveryOutcome::Primary => Some(Channel::Primary),
            DeliveryOutcome::Fallback { .. } => Some(Channel::Fallback),
            DeliveryOutcome::Failed { .. } => None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.channel().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub product_name: String,
    pub login_url: String,
    pub verify_continue_url: String,
    /// Administrative actor recorded in the send history. When unset, the
    /// notified account itself is recorded as the sender.
    pub history_sender_id: Option<String>,
}

impl DeliverySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            product_name: cfg.app.product_name.clone(),
            login_url: cfg.app.login_url(),
            verify_continue_url: cfg.app.verify_continue_url(),
            history_sender_id: cfg.app.history_sender_id.clone(),
        }
    }
}

pub struct DeliveryStrategy {
    identity: Arc<dyn IdentityProvider>,
    mailer: Arc<dyn MailTransport>,
    store: Arc<dyn NotificationStore>,
    templates: TemplateSet,
    settings: DeliverySettings,
}

impl DeliveryStrategy {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        mailer: Arc<dyn MailTransport>,
        store: Arc<dyn NotificationStore>,
        templates: TemplateSet,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            identity,
            mailer,
            store,
            templates,
            settings,
        }
    }

    /// Try the primary tier, then the fallback. First success wins.
    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn deliver(&self, user: &UserRecord, temporary_password: &str) -> DeliveryOutcome {
        let primary_error = match self.send_primary(user, temporary_password).await {
            Ok(rendered) => {
                info!(channel = "primary", "welcome mail delivered");
                self.record_history(user, &rendered).await;
                return DeliveryOutcome::Primary;
            }
            Err(err) => err,
        };
        warn!(error = %primary_error, "primary delivery failed; trying fallback");

        match self.send_fallback(user, temporary_password).await {
            Ok(rendered) => {
                info!(channel = "fallback", "welcome mail delivered");
                self.record_history(user, &rendered).await;
                DeliveryOutcome::Fallback { primary_error }
            }
            Err(fallback_error) => {
                warn!(error = %fallback_error, "fallback delivery failed");
                DeliveryOutcome::Failed {
                    primary_error,
                    fallback_error,
                }
            }
        }
    }

    async fn send_primary(
        &self,
        user: &UserRecord,
        temporary_password: &str,
    ) -> Result<RenderedMail, DeliveryError> {
        let display_name = user.display_name();
        let account = self
            .ensure_account(user, temporary_password, &display_name)
            .await?;

        let claims = json!({
            "email_verification": true,
            "timestamp": Utc::now().timestamp(),
        });
        if let Err(err) = self.identity.set_custom_claims(&account.uid, &claims).await {
            warn!(uid = %account.uid, error = %err, "failed to set custom claims; continuing");
        }

        let link = self
            .identity
            .issue_verification_link(&user.email, &self.settings.verify_continue_url)
            .await?;

        let rendered = self.templates.render_verification(&MailContext {
            product_name: &self.settings.product_name,
            display_name: &display_name,
            email: &user.email,
            temporary_password,
            role: &user.role,
            link: &link,
        })?;
        self.send(user, &rendered, BodyFormat::Html).await?;
        Ok(rendered)
    }

    async fn send_fallback(
        &self,
        user: &UserRecord,
        temporary_password: &str,
    ) -> Result<RenderedMail, DeliveryError> {
        let display_name = user.display_name();
        let rendered = self.templates.render_welcome(&MailContext {
            product_name: &self.settings.product_name,
            display_name: &display_name,
            email: &user.email,
            temporary_password,
            role: &user.role,
            link: &self.settings.login_url,
        })?;
        self.send(user, &rendered, BodyFormat::Text).await?;
        Ok(rendered)
    }

    /// Look the account up by email and create it when the provider has none.
    async fn ensure_account(
        &self,
        user: &UserRecord,
        temporary_password: &str,
        display_name: &str,
    ) -> Result<IdentityUser, DeliveryError> {
        match self.identity.get_user_by_email(&user.email).await {
            Ok(account) => Ok(account),
            Err(IdentityError::NotFound(_)) => {
                info!("no identity account yet; creating one");
                Ok(self
                    .identity
                    .create_user(&user.email, temporary_password, display_name)
                    .await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn send(
        &self,
        user: &UserRecord,
        rendered: &RenderedMail,
        format: BodyFormat,
    ) -> Result<(), MailError> {
        self.mailer
            .send(&OutgoingMail {
                to: user.email.clone(),
                subject: rendered.subject.clone(),
                body: rendered.body.clone(),
                format,
            })
            .await
    }

    /// Append a send-history entry. Failures are logged and swallowed: the
    /// mail is already out.
    async fn record_history(&self, user: &UserRecord, rendered: &RenderedMail) {
        let now = Utc::now();
        let entry = MailHistoryEntry {
            mail_id: String::new(),
            user_id: self
                .settings
                .history_sender_id
                .clone()
                .unwrap_or_else(|| user.id.clone()),
            recipient_id: user.id.clone(),
            subject: rendered.subject.clone(),
            body: rendered.body.clone(),
            status: MailStatus::Sent,
            attachments: Vec::new(),
            created_at: now,
            sent_at: Some(now),
        };
        match self.store.append_mail_history(&entry).await {
            Ok(mail_id) => info!(%mail_id, "mail history saved"),
            Err(err) => warn!(?err, "failed to save mail history; the mail itself was sent"),
        }
    }
}
