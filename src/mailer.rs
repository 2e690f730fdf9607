//! Outbound mail transport: a narrow `MailTransport` seam and its SMTP
//! implementation over lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Smtp, TlsMode};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to build message: {0}")]
    Build(String),
    /// The server took the attempt and refused it.
    #[error("recipient rejected: {0}")]
    Rejected(String),
    /// The attempt could not be made: connection, TLS, auth, timeout or a
    /// transient server condition.
    #[error("mail transport unavailable: {0}")]
    Unavailable(String),
}

impl MailError {
    /// Whether the server (or the address itself) refused this recipient, as
    /// opposed to the transport being unusable.
    pub fn is_rejection(&self) -> bool {
        matches!(self, MailError::Rejected(_) | MailError::InvalidAddress { .. })
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        if err.is_permanent() {
            MailError::Rejected(err.to_string())
        } else {
            MailError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Text,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub format: BodyFormat,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;

    /// Dial the server without sending anything.
    async fn test_connection(&self) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
    dry_run: bool,
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("host", &self.host)
            .field("from", &self.from.to_string())
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    pub fn from_config(cfg: &Smtp) -> Result<Self, MailError> {
        let address: Address = cfg.from_email.parse().map_err(|e: lettre::address::AddressError| {
            MailError::InvalidAddress {
                address: cfg.from_email.clone(),
                reason: e.to_string(),
            }
        })?;
        let from = Mailbox::new(Some(cfg.from_name.clone()), address);

        let builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
            .port(cfg.port)
            .timeout(Some(Duration::from_secs(cfg.timeout_secs)));
        let builder = match cfg.tls {
            TlsMode::None => builder,
            TlsMode::Starttls => builder.tls(Tls::Required(tls_parameters(&cfg.host)?)),
            TlsMode::Tls => builder.tls(Tls::Wrapper(tls_parameters(&cfg.host)?)),
        };
        let builder = if cfg.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
        };

        Ok(Self {
            transport: builder.build(),
            from,
            host: cfg.host.clone(),
            dry_run: cfg.dry_run,
        })
    }

    pub fn build_message(&self, mail: &OutgoingMail) -> Result<Message, MailError> {
        let to: Mailbox = mail.to.parse().map_err(|e: lettre::address::AddressError| {
            MailError::InvalidAddress {
                address: mail.to.clone(),
                reason: e.to_string(),
            }
        })?;
        let content_type = match mail.format {
            BodyFormat::Text => ContentType::TEXT_PLAIN,
            BodyFormat::Html => ContentType::TEXT_HTML,
        };
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .header(content_type)
            .body(mail.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

fn tls_parameters(host: &str) -> Result<TlsParameters, MailError> {
    TlsParameters::new(host.to_string())
        .map_err(|e| MailError::Unavailable(format!("TLS configuration error: {e}")))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = self.build_message(mail)?;
        if self.dry_run {
            info!(to = %mail.to, subject = %mail.subject, "dry run: mail not sent");
            return Ok(());
        }
        match self.transport.send(message).await {
            Ok(_) => {
                info!(to = %mail.to, "mail sent");
                Ok(())
            }
            Err(err) => {
                let err = MailError::from(err);
                warn!(to = %mail.to, %err, "mail send failed");
                Err(err)
            }
        }
    }

    async fn test_connection(&self) -> Result<(), MailError> {
        if self.dry_run {
            info!(host = %self.host, "dry run: skipping SMTP connection test");
            return Ok(());
        }
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::Unavailable(format!(
                "SMTP server {} did not accept the connection",
                self.host
            ))),
            Err(err) => Err(MailError::Unavailable(err.to_string())),
        }
    }
}
