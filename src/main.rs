use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

use welcome_dispatch::config;
use welcome_dispatch::db;
use welcome_dispatch::poller::Poller;
use welcome_dispatch::services::Services;

#[derive(Debug, Parser)]
#[command(author, version, about = "Send welcome mail for new welcome_email notifications")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let services = Services::connect(&cfg).await?;

    let pending = db::count_unprocessed_notifications(services.store.pool()).await?;
    info!(pending, "starting welcome dispatcher");

    let poller = Poller::new(services.dispatcher.clone(), cfg.app.poll_interval());
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received; stopping after the current scan"),
            Err(err) => error!(?err, "failed to listen for ctrl-c; stopping"),
        }
        let _ = stop_tx.send(true);
    });

    poller.run(stop_rx).await;
    Ok(())
}
