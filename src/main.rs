use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use torrent_relay::bot::Bot;
use torrent_relay::channel::TelegramChannel;
use torrent_relay::engine::{Aria2Engine, spawn_aria2_daemon};
use torrent_relay::instance_guard::InstanceGuard;
use torrent_relay::storage::{DriveStorage, RemoteStorage};
use torrent_relay::{Collaborators, Config, Orchestrator, Result, run_until_signal};

/// Chat-driven torrent download relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(short, long, env = "TORRENT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding per-job working directories
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Single-instance lock file
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "torrent-relay stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.download_dir {
        config.download.download_dir = dir;
    }
    if let Some(lock) = cli.lock_file {
        config.download.lock_path = lock;
    }
    config.validate()?;

    let _guard = InstanceGuard::acquire_exclusive(&config.download.lock_path)?;
    tokio::fs::create_dir_all(&config.download.download_dir).await?;

    let daemon = if config.engine.spawn_daemon {
        Some(spawn_aria2_daemon(&config.engine, &config.download.download_dir).await?)
    } else {
        None
    };

    let telegram = Arc::new(TelegramChannel::new(&config.telegram)?);
    let storage = match &config.storage {
        Some(drive) => Some(Arc::new(DriveStorage::new(drive)?) as Arc<dyn RemoteStorage>),
        None => {
            tracing::info!("No remote storage configured, remote upload disabled");
            None
        }
    };
    let parts = Collaborators {
        engine: Arc::new(Aria2Engine::new(&config.engine)?),
        channel: telegram.clone(),
        storage,
    };

    let orchestrator = Orchestrator::new(config, parts).await?;
    let removed = orchestrator.remove_stale_artifacts().await?;
    if removed > 0 {
        tracing::info!(removed, "Removed leftovers from a previous run");
    }
    let notifier = orchestrator.start_error_notifier();

    let stop = CancellationToken::new();
    let bot = tokio::spawn(Bot::new(telegram, orchestrator.clone()).run(stop.clone()));

    let result = run_until_signal(&orchestrator, stop).await;
    if let Err(e) = bot.await {
        tracing::error!(error = %e, "Bot task panicked");
    }
    if let Err(e) = notifier.await {
        tracing::error!(error = %e, "Error notifier task panicked");
    }
    if let Some(daemon) = daemon
        && let Err(e) = daemon.shutdown().await
    {
        tracing::warn!(error = %e, "Failed to stop aria2 daemon");
    }
    result
}
