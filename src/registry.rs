//! Job registry - the single source of truth for which jobs are live.
//!
//! Every mutation goes through one async mutex, so `create`, `remove`, state
//! transitions and stop requests are atomic with respect to each other. Callers only
//! ever receive [`JobSnapshot`] copies; nothing outside this module holds a
//! reference into a job record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, Result};
use crate::types::{
    CancelOutcome, Descriptor, Destination, JobId, JobSnapshot, JobState, ProgressSnapshot,
};

struct JobRecord {
    descriptor: Descriptor,
    destination: Destination,
    state: JobState,
    name: Option<String>,
    progress: Option<ProgressSnapshot>,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    /// Consulted by the job task at every suspension point before `Delivering`
    cancel: CancellationToken,
}

impl JobRecord {
    fn snapshot(&self, id: JobId) -> JobSnapshot {
        JobSnapshot {
            id,
            descriptor: self.descriptor.clone(),
            destination: self.destination,
            state: self.state,
            name: self.name.clone(),
            progress: self.progress,
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    /// Last id handed out; ids are never reused
    last_id: u64,
    /// Set by [`JobRegistry::close`]; refuses further jobs
    closed: bool,
}

impl Inner {
    fn insert(&mut self, descriptor: Descriptor, destination: Destination) -> JobId {
        self.last_id += 1;
        let id = JobId(self.last_id);
        self.jobs.insert(
            id,
            JobRecord {
                descriptor,
                destination,
                state: JobState::AwaitingMetadata,
                name: None,
                progress: None,
                cancel_requested: false,
                created_at: Utc::now(),
                cancel: CancellationToken::new(),
            },
        );
        id
    }
}

/// Concurrency-safe map of job id to job record
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in `AwaitingMetadata` and return its id
    ///
    /// Ids increase monotonically, so an id is never handed out twice, even after the
    /// job holding it was removed.
    pub async fn create(&self, descriptor: Descriptor, destination: Destination) -> JobId {
        self.inner.lock().await.insert(descriptor, destination)
    }

    /// Like [`create`](Self::create), but `None` once the registry is closed
    ///
    /// The closed check and the insert share one lock with [`close`](Self::close), so a
    /// job either exists before shutdown signals every job or is never created.
    pub(crate) async fn create_if_open(
        &self,
        descriptor: Descriptor,
        destination: Destination,
    ) -> Option<JobId> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return None;
        }
        Some(inner.insert(descriptor, destination))
    }

    /// Snapshot of a live job
    pub async fn get(&self, id: JobId) -> Result<JobSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(&id)
            .map(|record| record.snapshot(id))
            .ok_or_else(|| JobError::NotFound { id }.into())
    }

    /// Remove a job, returning its last snapshot
    pub async fn remove(&self, id: JobId) -> Option<JobSnapshot> {
        let mut inner = self.inner.lock().await;
        inner.jobs.remove(&id).map(|record| record.snapshot(id))
    }

    /// Snapshots of every live job, ordered by id
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<JobSnapshot> = inner
            .jobs
            .iter()
            .map(|(id, record)| record.snapshot(*id))
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Number of live jobs
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    /// Whether no job is live
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Request a stop
    ///
    /// Before `Delivering` the job's cancellation token fires and the job stops at its
    /// next suspension point. Once delivering, the request is only recorded.
    pub async fn request_cancel(&self, id: JobId) -> Result<CancelOutcome> {
        let mut inner = self.inner.lock().await;
        let record = inner.jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        record.cancel_requested = true;
        if record.state == JobState::Delivering {
            return Ok(CancelOutcome::DeferredUntilDelivered);
        }
        record.cancel.cancel();
        Ok(CancelOutcome::Requested)
    }

    /// Refuse new jobs and request a stop for every live one
    ///
    /// Returns how many jobs were signalled; delivering jobs are only marked.
    pub(crate) async fn close(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        let mut signalled = 0;
        for record in inner.jobs.values_mut() {
            record.cancel_requested = true;
            if record.state != JobState::Delivering {
                record.cancel.cancel();
                signalled += 1;
            }
        }
        signalled
    }

    /// Cancellation token for a job
    pub(crate) async fn cancel_token(&self, id: JobId) -> Result<CancellationToken> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(&id)
            .map(|record| record.cancel.clone())
            .ok_or_else(|| JobError::NotFound { id }.into())
    }

    /// Move a job to a non-terminal state
    pub(crate) async fn transition(&self, id: JobId, next: JobState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner.jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if next.is_terminal() || !record.state.can_transition_to(next) {
            return Err(JobError::InvalidState {
                id,
                operation: format!("transition to {:?}", next),
                current_state: format!("{:?}", record.state),
            }
            .into());
        }
        record.state = next;
        Ok(())
    }

    /// Enter `Delivering` unless a stop was requested first
    ///
    /// Returns `false` when the job must be cancelled instead. The check and the
    /// transition happen under one lock, so a stop request lands either strictly
    /// before delivery (and wins) or strictly after (and is deferred).
    pub(crate) async fn begin_delivery(&self, id: JobId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let record = inner.jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        if record.cancel_requested || record.cancel.is_cancelled() {
            return Ok(false);
        }
        if !record.state.can_transition_to(JobState::Delivering) {
            return Err(JobError::InvalidState {
                id,
                operation: "begin delivery".to_string(),
                current_state: format!("{:?}", record.state),
            }
            .into());
        }
        record.state = JobState::Delivering;
        Ok(true)
    }

    /// Record the content name once metadata is known
    pub(crate) async fn set_name(&self, id: JobId, name: &str) {
        if let Some(record) = self.inner.lock().await.jobs.get_mut(&id) {
            record.name = Some(name.to_string());
        }
    }

    /// Record the latest progress snapshot
    pub(crate) async fn record_progress(&self, id: JobId, snapshot: ProgressSnapshot) {
        if let Some(record) = self.inner.lock().await.jobs.get_mut(&id) {
            record.progress = Some(snapshot);
        }
    }

    /// Apply a terminal state and deregister the job
    ///
    /// The job is removed even when the transition is unexpected, so a terminal job
    /// never lingers in the registry.
    pub(crate) async fn finish(&self, id: JobId, terminal: JobState) -> Option<JobSnapshot> {
        let mut inner = self.inner.lock().await;
        let mut record = inner.jobs.remove(&id)?;
        if !record.state.can_transition_to(terminal) {
            tracing::warn!(
                job_id = id.0,
                from = ?record.state,
                to = ?terminal,
                "Unexpected terminal transition"
            );
        }
        record.state = terminal;
        Some(record.snapshot(id))
    }
}
