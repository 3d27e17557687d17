//! # torrent-relay
//!
//! Chat-driven torrent download relay. Requesters submit magnet links or `.torrent`
//! files over Telegram, pick a destination, and get the finished content back either as
//! a file in the same chat or as a link to a remote storage upload.
//!
//! ## Design Philosophy
//!
//! - **Many concurrent jobs** - every job runs as its own task with its own cancellation
//! - **Pluggable collaborators** - the transfer engine, the requester channel and remote
//!   storage are traits; aria2, Telegram and Google Drive are the shipped implementations
//! - **Event-driven** - consumers subscribe to lifecycle events instead of polling
//! - **Always clean up** - a job that ends for any reason leaves nothing on disk
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use torrent_relay::channel::TelegramChannel;
//! use torrent_relay::engine::Aria2Engine;
//! use torrent_relay::{Collaborators, Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let parts = Collaborators {
//!         engine: Arc::new(Aria2Engine::new(&config.engine)?),
//!         channel: Arc::new(TelegramChannel::new(&config.telegram)?),
//!         storage: None,
//!     };
//!     let orchestrator = Orchestrator::new(config, parts).await?;
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-job working directories
pub mod artifact;
/// Telegram front end
pub mod bot;
/// Requester-facing channel
pub mod channel;
/// Configuration types
pub mod config;
/// Delivery destinations
pub mod delivery;
/// Transfer engine abstraction and the aria2 backend
pub mod engine;
/// Error types
pub mod error;
/// Buffered failure reports for the owner
pub mod error_aggregator;
/// Single-instance lock
pub mod instance_guard;
/// Job orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Live job registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Remote storage providers
pub mod storage;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{DeliveryError, EngineError, Error, JobError, Result};
pub use orchestrator::{Collaborators, JobRequest, Orchestrator};
pub use types::{
    CancelOutcome, ChatRef, DeliveryReference, Descriptor, Destination, ErrorRecord, Event,
    JobId, JobSnapshot, JobState, MessageRef, ProgressSnapshot,
};

/// Helper function to run the relay until a termination signal arrives.
///
/// Cancels `stop` (which front ends such as [`bot::Bot::run`] watch) once the signal is
/// received, then calls the orchestrator's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_until_signal(
    orchestrator: &Orchestrator,
    stop: tokio_util::sync::CancellationToken,
) -> Result<()> {
    wait_for_signal().await;
    stop.cancel();
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
