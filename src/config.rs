//! Configuration loader and validator for the welcome-mail dispatcher.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub smtp: Smtp,
    pub identity: Identity,
}

/// How the dispatcher asks the store for candidates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Ask the store for `processed = false` rows only.
    #[default]
    UnprocessedOnly,
    /// Fetch a page of recent rows and filter client-side.
    Recent,
}

/// What happens to a record whose delivery could not be attempted on either tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TotalFailurePolicy {
    #[default]
    MarkProcessed,
    LeaveUnprocessed,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub database_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_sweep_page_size")]
    pub sweep_page_size: u32,
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default)]
    pub on_total_failure: TotalFailurePolicy,
    pub product_name: String,
    pub frontend_url: String,
    #[serde(default)]
    pub history_sender_id: Option<String>,
    #[serde(default)]
    pub template_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    None,
    #[default]
    Starttls,
    Tls,
}

/// Outbound SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Smtp {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Identity provider REST settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub base_url: String,
    pub project_id: String,
    pub access_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

fn default_sweep_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    10
}

const MAX_PAGE_SIZE: u32 = 500;

impl App {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Login page used by the fallback mail.
    pub fn login_url(&self) -> String {
        self.frontend_url.trim_end_matches('/').to_string()
    }

    /// Where the identity provider sends users after they follow the verification link.
    pub fn verify_continue_url(&self) -> String {
        format!("{}/auth/verify", self.frontend_url.trim_end_matches('/'))
    }

    /// `DATABASE_URL` wins over the configured value.
    pub fn resolved_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database_url.clone())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.database_url must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.page_size == 0 || cfg.app.page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::Invalid("app.page_size must be within 1..=500"));
    }
    if cfg.app.sweep_page_size < cfg.app.page_size || cfg.app.sweep_page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::Invalid(
            "app.sweep_page_size must be >= app.page_size and <= 500",
        ));
    }
    if cfg.app.product_name.trim().is_empty() {
        return Err(ConfigError::Invalid("app.product_name must be non-empty"));
    }
    if !cfg.app.frontend_url.starts_with("http://") && !cfg.app.frontend_url.starts_with("https://")
    {
        return Err(ConfigError::Invalid("app.frontend_url must be an http(s) URL"));
    }

    if cfg.smtp.host.trim().is_empty() {
        return Err(ConfigError::Invalid("smtp.host must be non-empty"));
    }
    if cfg.smtp.port == 0 {
        return Err(ConfigError::Invalid("smtp.port must be > 0"));
    }
    if !cfg.smtp.from_email.contains('@') {
        return Err(ConfigError::Invalid("smtp.from_email must be an email address"));
    }
    if cfg.smtp.username.trim().is_empty() != cfg.smtp.password.is_empty() {
        return Err(ConfigError::Invalid(
            "smtp.username and smtp.password must be set together",
        ));
    }

    if cfg.identity.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("identity.base_url must be non-empty"));
    }
    if cfg.identity.project_id.trim().is_empty() {
        return Err(ConfigError::Invalid("identity.project_id must be non-empty"));
    }
    if cfg.identity.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("identity.access_token must be non-empty"));
    }

    Ok(())
}

/// Returns a complete example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  database_url: "sqlite://./data/dispatch.db"
  poll_interval_secs: 30
  page_size: 50
  sweep_page_size: 100
  scan_mode: unprocessed_only
  on_total_failure: mark_processed
  product_name: "Narratives CRM"
  frontend_url: "https://crm.example.com"
  history_sender_id: "system"

smtp:
  host: "smtp.example.com"
  port: 587
  username: "mailer@example.com"
  password: "YOUR_SMTP_APP_PASSWORD"
  from_email: "no-reply@example.com"
  from_name: "Narratives CRM"
  tls: starttls
  dry_run: false
  timeout_secs: 10

identity:
  base_url: "https://identitytoolkit.googleapis.com/"
  project_id: "YOUR_PROJECT_ID"
  access_token: "YOUR_SERVICE_ACCESS_TOKEN"
"#
}
