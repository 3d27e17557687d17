//! Job orchestrator split into focused submodules.
//!
//! The [`Orchestrator`] struct and its methods are organized by concern:
//! - [`control`] - Starting, cancelling and inspecting jobs
//! - [`job_task`] - The per-job task: metadata wait, transfer, delivery, cleanup
//! - [`monitor`] - Progress polling and status text rendering
//! - [`status_writer`] - Single writer for requester-facing status messages
//! - [`lifecycle`] - Shutdown coordination
//! - [`services`] - Background service starters

mod control;
mod job_task;
mod lifecycle;
pub mod monitor;
mod services;
mod status_writer;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use control::JobRequest;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::channel::RequesterChannel;
use crate::config::Config;
use crate::delivery::DeliveryDispatcher;
use crate::engine::{EngineSession, TransferEngine};
use crate::error::{Error, Result};
use crate::error_aggregator::ErrorAggregator;
use crate::registry::JobRegistry;
use crate::storage::RemoteStorage;
use crate::types::Event;
use status_writer::{StatusBoard, spawn_status_writer};

/// External capabilities the orchestrator drives
pub struct Collaborators {
    /// Peer-to-peer transfer engine
    pub engine: Arc<dyn TransferEngine>,
    /// Where status is shown and artifacts are returned
    pub channel: Arc<dyn RequesterChannel>,
    /// Remote storage; `None` makes the remote upload destination unavailable
    pub storage: Option<Arc<dyn RemoteStorage>>,
}

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Live jobs
    pub(crate) registry: Arc<JobRegistry>,
    /// Shared engine session (serializes add/remove)
    pub(crate) session: Arc<EngineSession>,
    /// Routes finished artifacts to their destination
    pub(crate) dispatcher: Arc<DeliveryDispatcher>,
    /// Requester-facing channel (owner notices, direct return)
    pub(crate) channel: Arc<dyn RequesterChannel>,
    /// Buffered failures for the periodic owner report
    pub(crate) errors: Arc<ErrorAggregator>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Pending status work drained by the status writer
    pub(crate) status: Arc<StatusBoard>,
    /// Whether new jobs are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Cancelled once shutdown has drained the jobs; stops background services
    pub(crate) shutdown_token: CancellationToken,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Creates the download root and descriptor inbox, then starts the status writer.
    /// No jobs run until [`start_job`](Self::start_job) is called.
    pub async fn new(config: Config, parts: Collaborators) -> Result<Self> {
        for dir in [
            config.download.download_dir.clone(),
            config.download.descriptor_inbox(),
        ] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                ))
            })?;
        }

        // 1000 events of headroom before a slow subscriber starts lagging
        let (event_tx, _rx) = broadcast::channel(1000);
        let status = Arc::new(StatusBoard::new());
        let shutdown_token = CancellationToken::new();

        let session = Arc::new(EngineSession::new(parts.engine, config.retry.clone()));
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            parts.channel.clone(),
            parts.storage.clone(),
        ));
        let errors = Arc::new(ErrorAggregator::new(
            config.notifications.error_buffer_capacity,
        ));

        spawn_status_writer(parts.channel.clone(), status.clone(), shutdown_token.clone());

        tracing::info!(
            engine = session.engine_name(),
            storage = parts.storage.as_ref().map(|s| s.name()),
            download_dir = %config.download.download_dir.display(),
            "Orchestrator initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(JobRegistry::new()),
            session,
            dispatcher,
            channel: parts.channel,
            errors,
            event_tx,
            status,
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token,
        })
    }

    /// Subscribe to job events
    ///
    /// Each subscriber receives every event independently. A subscriber that falls more
    /// than 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Error buffer drained by the owner notifier
    pub fn errors(&self) -> Arc<ErrorAggregator> {
        Arc::clone(&self.errors)
    }

    /// Delivery dispatcher (destination availability)
    pub fn dispatcher(&self) -> Arc<DeliveryDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
