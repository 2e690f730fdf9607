use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use welcome_dispatch::config;
use welcome_dispatch::db;
use welcome_dispatch::dispatcher::RecordOutcome;
use welcome_dispatch::health;
use welcome_dispatch::services::Services;

#[derive(Debug, Parser)]
#[command(author, version, about = "Operator triggers for the welcome dispatcher")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline for one notification, even if it is already processed
    ProcessOne {
        #[arg(long)]
        id: String,
    },
    /// Sweep pending notifications once and exit
    ProcessAll,
    /// Check store, SMTP and identity provider connectivity
    Check,
    /// List recent mail history rows recorded under a user ID
    History {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print an example config.yaml
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    let services = Services::connect(&cfg).await?;

    match args.command {
        Command::ProcessOne { id } => match services.dispatcher.process_one(&id).await? {
            RecordOutcome::Completed { delivery, mark } => {
                let channel = delivery
                    .as_ref()
                    .and_then(|d| d.channel())
                    .map(|c| c.as_str())
                    .unwrap_or("none");
                info!(notification_id = %id, channel, ?mark, "notification processed");
            }
            RecordOutcome::Deferred { .. } => {
                warn!(notification_id = %id, "delivery unavailable; notification left unprocessed");
            }
        },
        Command::ProcessAll => {
            let report = services.dispatcher.process_all_pending().await?;
            let remaining = db::count_unprocessed_notifications(services.store.pool()).await?;
            info!(
                fetched = report.fetched,
                processed = report.processed,
                delivered = report.delivered,
                deferred = report.deferred,
                errors = report.errors.len(),
                remaining,
                "sweep complete"
            );
            for failed in &report.errors {
                warn!(notification_id = %failed.notification_id, error = %failed.error, "not processed");
            }
        }
        Command::Check => {
            let report = health::check_all(
                services.store.as_ref(),
                services.mailer.as_ref(),
                services.identity.as_ref(),
            )
            .await;
            for check in &report.checks {
                println!("{check}");
            }
            if !report.healthy() {
                bail!("one or more checks failed");
            }
        }
        Command::History { user, limit } => {
            let rows = db::list_mail_history(services.store.pool(), &user, limit).await?;
            if rows.is_empty() {
                info!(user_id = %user, "no mail history");
            }
            for row in &rows {
                println!(
                    "{}  {:<6}  {}  to={}  {}",
                    row.created_at.to_rfc3339(),
                    row.status.as_str(),
                    row.mail_id,
                    row.recipient_id,
                    row.subject
                );
            }
        }
        Command::ExampleConfig => {}
    }
    Ok(())
}
