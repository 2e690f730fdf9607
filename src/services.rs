//! Wires the store, identity client, mailer and templates into a dispatcher.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::delivery::{DeliverySettings, DeliveryStrategy};
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::identity::{IdentityClient, IdentityProvider};
use crate::mailer::{MailTransport, SmtpMailer};
use crate::store::{NotificationStore, SqliteStore};
use crate::templates::TemplateSet;

pub struct Services {
    pub store: Arc<SqliteStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub mailer: Arc<dyn MailTransport>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Services {
    /// Open the database, run migrations and build the production clients.
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let database_url = cfg.app.resolved_database_url();
        let pool = db::init_pool(&database_url).await?;
        db::run_migrations(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let identity: Arc<dyn IdentityProvider> = Arc::new(IdentityClient::from_config(cfg)?);
        let mailer: Arc<dyn MailTransport> =
            Arc::new(SmtpMailer::from_config(&cfg.smtp).context("failed to configure SMTP")?);
        if cfg.smtp.dry_run {
            info!("smtp.dry_run is set; mail will be logged, not sent");
        }

        let templates = TemplateSet::load(cfg.app.template_dir.as_deref().map(Path::new))
            .context("failed to load mail templates")?;

        let dispatcher = build_dispatcher(
            cfg,
            store.clone(),
            identity.clone(),
            mailer.clone(),
            templates,
        );
        Ok(Self {
            store,
            identity,
            mailer,
            dispatcher,
        })
    }
}

/// Build a dispatcher over any store / provider / transport.
pub fn build_dispatcher(
    cfg: &Config,
    store: Arc<dyn NotificationStore>,
    identity: Arc<dyn IdentityProvider>,
    mailer: Arc<dyn MailTransport>,
    templates: TemplateSet,
) -> Arc<Dispatcher> {
    let delivery = DeliveryStrategy::new(
        identity,
        mailer,
        store.clone(),
        templates,
        DeliverySettings::from_config(cfg),
    );
    Arc::new(Dispatcher::new(
        store,
        delivery,
        DispatcherSettings::from_config(cfg),
    ))
}
