//! Job task context: shared state and status helpers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::artifact::WorkingArtifact;
use crate::config::Config;
use crate::delivery::DeliveryDispatcher;
use crate::engine::EngineSession;
use crate::error_aggregator::ErrorAggregator;
use crate::registry::JobRegistry;
use crate::types::{ChatRef, Descriptor, Destination, Event, JobId};

use super::super::status_writer::{StatusBoard, StatusUpdate};

/// Shared context for a single job task, reducing parameter passing between helpers.
pub(crate) struct JobContext {
    pub(crate) id: JobId,
    pub(crate) descriptor: Descriptor,
    pub(crate) destination: Destination,
    pub(crate) chat: ChatRef,
    /// Fires on a stop request made before delivery
    pub(crate) cancel: CancellationToken,
    /// The job's working directory; released in finalization
    pub(crate) artifact: WorkingArtifact,
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) session: Arc<EngineSession>,
    pub(crate) dispatcher: Arc<DeliveryDispatcher>,
    pub(crate) errors: Arc<ErrorAggregator>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) status: Arc<StatusBoard>,
    pub(crate) config: Arc<Config>,
}

impl JobContext {
    /// Emit an event; dropped when nobody listens
    pub(super) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Queue a status rendering for this job; never waits on the channel
    pub(super) fn render(&self, text: String) {
        self.status.post(StatusUpdate::Render {
            job: self.id,
            chat: self.chat,
            text,
        });
    }
}
