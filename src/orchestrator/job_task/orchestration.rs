//! Top-level job lifecycle: metadata wait, transfer, delivery.

use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::delivery::package_artifact;
use crate::engine::TransferHandle;
use crate::error::{JobError, Result};
use crate::types::{DeliveryReference, Event, JobState};

use super::super::monitor::{ProgressMonitor, StatusRenderer};
use super::context::JobContext;
use super::finalization::finalize_job;

/// Phase a failure happened in; decides who hears about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FailureStage {
    Metadata,
    Transfer,
    Delivery,
}

/// How the job ended
#[derive(Debug)]
pub(super) enum JobOutcome {
    Completed {
        name: String,
        reference: DeliveryReference,
    },
    Cancelled,
    Failed {
        stage: FailureStage,
        error: String,
    },
}

impl JobOutcome {
    fn failed(stage: FailureStage, error: impl std::fmt::Display) -> Self {
        JobOutcome::Failed {
            stage,
            error: error.to_string(),
        }
    }
}

/// Run a job from descriptor to terminal state
///
/// Never returns an error: every failure becomes a terminal state. Finalization runs
/// on every path, including a panic inside the lifecycle.
pub(crate) async fn run_job(ctx: JobContext) {
    let mut handle: Option<Arc<dyn TransferHandle>> = None;

    let outcome = match AssertUnwindSafe(drive(&ctx, &mut handle))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!(job_id = ctx.id.0, "Job task panicked");
            let stage = match ctx.registry.get(ctx.id).await.map(|job| job.state) {
                Ok(JobState::Delivering) => FailureStage::Delivery,
                Ok(JobState::Transferring) => FailureStage::Transfer,
                _ => FailureStage::Metadata,
            };
            JobOutcome::failed(stage, "internal error")
        }
    };

    finalize_job(ctx, handle, outcome).await;
}

async fn drive(ctx: &JobContext, slot: &mut Option<Arc<dyn TransferHandle>>) -> JobOutcome {
    // not raced with cancellation: an abandoned add could leave an orphan transfer
    let handle = match ctx
        .session
        .add_transfer(&ctx.descriptor, ctx.artifact.path())
        .await
    {
        Ok(handle) => handle,
        Err(e) => return JobOutcome::failed(FailureStage::Metadata, e),
    };
    *slot = Some(handle.clone());
    tracing::debug!(job_id = ctx.id.0, key = %handle.key(), "Transfer added");

    if ctx.cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }

    match wait_for_metadata(ctx, handle.as_ref()).await {
        Ok(true) => {}
        Ok(false) => return JobOutcome::Cancelled,
        Err(e) => return JobOutcome::failed(FailureStage::Metadata, e),
    }

    let name = match ctx.session.name(handle.as_ref()).await {
        Ok(name) => name,
        Err(e) => return JobOutcome::failed(FailureStage::Metadata, e),
    };
    ctx.registry.set_name(ctx.id, &name).await;
    if let Err(e) = ctx.registry.transition(ctx.id, JobState::Transferring).await {
        return JobOutcome::failed(FailureStage::Metadata, e);
    }
    tracing::info!(job_id = ctx.id.0, name = %name, "Metadata resolved");
    ctx.emit(Event::MetadataResolved {
        id: ctx.id,
        name: name.clone(),
    });
    ctx.render(format!("⬇️ Download started: {} (job {})", name, ctx.id));

    if let Some(outcome) = transfer(ctx, handle.clone(), &name).await {
        return outcome;
    }

    match ctx.registry.begin_delivery(ctx.id).await {
        Ok(true) => {}
        Ok(false) => return JobOutcome::Cancelled,
        Err(e) => return JobOutcome::failed(FailureStage::Transfer, e),
    }
    tracing::info!(job_id = ctx.id.0, destination = %ctx.destination, "Delivering artifact");
    ctx.emit(Event::Delivering { id: ctx.id });
    ctx.render(format!("📤 Delivering {}...", name));

    match deliver(ctx, &name).await {
        Ok(reference) => JobOutcome::Completed { name, reference },
        Err(e) => JobOutcome::failed(FailureStage::Delivery, e),
    }
}

/// Poll until metadata arrives
///
/// Returns `Ok(false)` when the job was cancelled while waiting.
async fn wait_for_metadata(ctx: &JobContext, handle: &dyn TransferHandle) -> Result<bool> {
    let started = tokio::time::Instant::now();
    let deadline = ctx.config.download.metadata_timeout.map(|t| started + t);
    let mut ticker = tokio::time::interval(ctx.config.download.metadata_poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Ok(false),
            _ = ticker.tick() => {}
        }

        let ready = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Ok(false),
            ready = ctx.session.has_metadata(handle) => ready?,
        };
        if ready {
            return Ok(true);
        }

        if let Some(deadline) = deadline
            && tokio::time::Instant::now() >= deadline
        {
            return Err(JobError::MetadataTimeout {
                id: ctx.id,
                waited_secs: started.elapsed().as_secs(),
            }
            .into());
        }
    }
}

/// Follow the transfer until it completes
///
/// Returns `Some` when the job ends during the transfer.
async fn transfer(
    ctx: &JobContext,
    handle: Arc<dyn TransferHandle>,
    name: &str,
) -> Option<JobOutcome> {
    let monitor = ProgressMonitor::new(
        ctx.session.clone(),
        handle,
        ctx.config.download.progress_interval,
    );
    let snapshots = monitor.snapshots();
    futures::pin_mut!(snapshots);
    let mut renderer = StatusRenderer::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Some(JobOutcome::Cancelled),
            next = snapshots.next() => next,
        };

        match next {
            Some(Ok(tick)) => {
                ctx.registry.record_progress(ctx.id, tick.snapshot).await;
                ctx.emit(Event::Progress {
                    id: ctx.id,
                    snapshot: tick.snapshot,
                });
                if let Some(text) = renderer.render(name, &tick.snapshot) {
                    ctx.render(text);
                }
                if tick.complete {
                    tracing::info!(job_id = ctx.id.0, "Transfer complete");
                    return None;
                }
            }
            Some(Err(e)) => return Some(JobOutcome::failed(FailureStage::Transfer, e)),
            None => {
                return Some(JobOutcome::failed(
                    FailureStage::Transfer,
                    "progress stopped before the transfer completed",
                ));
            }
        }
    }
}

async fn deliver(ctx: &JobContext, name: &str) -> Result<DeliveryReference> {
    let content = ctx.artifact.path().join(name);
    let file = package_artifact(&content, ctx.artifact.path()).await?;
    let title = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let reference = ctx
        .dispatcher
        .deliver(&file, ctx.destination, ctx.chat, &title)
        .await?;
    Ok(reference)
}
