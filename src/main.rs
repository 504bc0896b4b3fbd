mod config;
mod context;
mod delivery;
mod digest;
mod error;
mod extract;
mod platform;
mod scheduler;
mod store;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DestinationKind};
use crate::platform::bridge::BridgeSource;
use crate::platform::discord::DiscordDestination;
use crate::platform::telegram::TelegramDestination;
use crate::platform::{Destination, MessageSource};
use crate::scheduler::{PollScheduler, Shutdown};
use crate::store::SeenTracker;

const DEFAULT_CONFIG_PATH: &str = "linkrelay.toml";

/// Forward links posted in a chat channel, with surrounding context, to another channel.
#[derive(Parser, Debug)]
#[command(name = "linkrelay", version, about)]
struct Cli {
    /// Path to the TOML config file (default: linkrelay.toml, skipped if absent)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single poll cycle and exit with its status
    #[arg(long)]
    once: bool,

    /// Move the stored cursor back to this message id before starting
    #[arg(long, value_name = "ID")]
    rewind_to: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,linkrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let explicit = cli.config.is_some();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path, explicit)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Source: {} via {}", config.source.channel, config.source.api_url);
    info!(
        "  Destination: {} channel {}",
        config.destination.kind, config.destination.channel
    );
    info!("  Interval: {}s", config.poll.interval_secs);
    info!(
        "  Context: {} before / {} after",
        config.digest.context_before, config.digest.context_after
    );
    info!("  State: {}", config.state.path.display());

    let settings = config.poll_settings()?;
    let timeout = config.request_timeout();

    let source: Arc<dyn MessageSource> = Arc::new(BridgeSource::new(
        &config.source.api_url,
        &config.source.api_token,
        &config.source.channel,
        timeout,
    )?);
    let destination: Arc<dyn Destination> = match config.destination.kind {
        DestinationKind::Discord => {
            Arc::new(DiscordDestination::new(&config.destination.token, timeout)?)
        }
        DestinationKind::Telegram => {
            Arc::new(TelegramDestination::new(&config.destination.token, timeout)?)
        }
    };

    source
        .authenticate()
        .await
        .context("Source authentication failed")?;
    destination
        .authenticate()
        .await
        .context("Destination authentication failed")?;

    let mut tracker = SeenTracker::open(&config.state.path, &config.source.channel)?;
    info!(
        "  Seen ids loaded: {} (cursor {:?})",
        tracker.seen_count(),
        tracker.cursor()
    );
    if let Some(id) = cli.rewind_to {
        tracker.rewind_cursor(id)?;
        info!("Cursor rewound to {}", id);
    }

    let (shutdown_tx, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing current step...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let mut scheduler = PollScheduler::new(source, destination, tracker, settings, shutdown);

    if config.poll.announce_startup {
        scheduler
            .dispatcher()
            .announce(&format!(
                "linkrelay online, forwarding links from {}",
                config.source.channel
            ))
            .await;
    }

    if cli.once {
        // An interrupted single cycle is still a clean exit.
        scheduler.run_once().await?;
        return Ok(());
    }

    info!("Relay is starting...");
    scheduler.run().await?;

    Ok(())
}
