//! Job control: start, cancel, inspect.

use std::sync::atomic::Ordering;

use crate::artifact::WorkingArtifact;
use crate::error::{Error, JobError, Result};
use crate::types::{
    CancelOutcome, ChatRef, Descriptor, Destination, Event, JobId, JobSnapshot, MessageRef,
};

use super::Orchestrator;
use super::job_task::{JobContext, run_job};
use super::status_writer::StatusUpdate;

/// Everything needed to start a job
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Magnet link or descriptor file
    pub descriptor: Descriptor,
    /// Where the finished artifact goes
    pub destination: Destination,
    /// Conversation of the requester
    pub chat: ChatRef,
    /// Message to reuse as the job's status message (e.g. the destination prompt)
    pub status_message: Option<MessageRef>,
}

impl Orchestrator {
    /// Register a job and spawn its task
    ///
    /// The returned id is unique for the lifetime of the orchestrator. The job is
    /// visible to [`jobs`](Self::jobs) as soon as this returns, and the first event its
    /// subscribers see is [`Event::JobCreated`].
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once shutdown has begun
    /// - [`JobError::DestinationUnavailable`] when the destination cannot be served; no
    ///   job is created in that case
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use torrent_relay::*;
    /// # async fn example(orchestrator: Orchestrator) -> Result<()> {
    /// let id = orchestrator
    ///     .start_job(JobRequest {
    ///         descriptor: Descriptor::Magnet("magnet:?xt=urn:btih:abc".into()),
    ///         destination: Destination::DirectReturn,
    ///         chat: ChatRef(42),
    ///         status_message: None,
    ///     })
    ///     .await?;
    /// println!("started job {id}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_job(&self, request: JobRequest) -> Result<JobId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if !self.dispatcher.is_available(request.destination) {
            return Err(JobError::DestinationUnavailable {
                destination: request.destination,
            }
            .into());
        }

        let JobRequest {
            descriptor,
            destination,
            chat,
            status_message,
        } = request;

        // shutdown may have closed the registry since the check above
        let id = self
            .registry
            .create_if_open(descriptor.clone(), destination)
            .await
            .ok_or(Error::ShuttingDown)?;
        let cancel = self.registry.cancel_token(id).await?;
        let artifact = WorkingArtifact::for_job(&self.config.download.download_dir, id);

        tracing::info!(
            job_id = id.0,
            descriptor = %descriptor.label(),
            destination = %destination,
            "Job created"
        );

        if let Some(message) = status_message {
            self.status.post(StatusUpdate::Bind { job: id, message });
        }
        self.status.post(StatusUpdate::Render {
            job: id,
            chat,
            text: format!("🔍 Fetching torrent metadata... (job {id})"),
        });
        self.emit_event(Event::JobCreated { id, destination });

        let ctx = JobContext {
            id,
            descriptor,
            destination,
            chat,
            cancel,
            artifact,
            registry: self.registry.clone(),
            session: self.session.clone(),
            dispatcher: self.dispatcher.clone(),
            errors: self.errors.clone(),
            event_tx: self.event_tx.clone(),
            status: self.status.clone(),
            config: self.config.clone(),
        };
        tokio::spawn(run_job(ctx));

        Ok(id)
    }

    /// Request that a job stop
    ///
    /// Before delivery begins, the job stops at its next suspension point and ends
    /// `Cancelled`. Once delivering, the hand-off runs to completion and the request is
    /// only recorded ([`CancelOutcome::DeferredUntilDelivered`]).
    ///
    /// # Errors
    ///
    /// [`JobError::NotFound`] when no live job has this id (including jobs that already
    /// reached a terminal state).
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome> {
        let outcome = self.registry.request_cancel(id).await?;
        tracing::info!(job_id = id.0, outcome = ?outcome, "Stop requested");
        Ok(outcome)
    }

    /// Snapshot of one live job
    pub async fn job(&self, id: JobId) -> Result<JobSnapshot> {
        self.registry.get(id).await
    }

    /// Snapshots of every live job, ordered by id
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.registry.list().await
    }
}
