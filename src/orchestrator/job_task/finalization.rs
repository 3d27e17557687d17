//! Job finalization: cleanup, terminal state, final status.

use std::sync::Arc;

use crate::engine::TransferHandle;
use crate::types::{DeliveryReference, Descriptor, Event, JobState};

use super::super::status_writer::StatusUpdate;
use super::context::JobContext;
use super::orchestration::{FailureStage, JobOutcome};

/// Release everything the job holds and apply its terminal state.
///
/// Cleanup runs first and unconditionally: the engine transfer is removed, the working
/// directory deleted and an uploaded descriptor file discarded. Only then is the job
/// deregistered and its terminal event emitted, so an observer that sees the event
/// also sees a clean filesystem and registry.
pub(super) async fn finalize_job(
    ctx: JobContext,
    handle: Option<Arc<dyn TransferHandle>>,
    outcome: JobOutcome,
) {
    let JobContext {
        id,
        descriptor,
        chat,
        artifact,
        registry,
        session,
        errors,
        event_tx,
        status,
        config,
        ..
    } = ctx;

    if let Some(handle) = handle
        && let Err(e) = session.remove_transfer(handle.as_ref()).await
    {
        tracing::warn!(job_id = id.0, key = %handle.key(), error = %e, "Failed to remove transfer");
    }

    let work_dir = artifact.path().to_path_buf();
    if let Err(e) = artifact.release().await {
        tracing::error!(
            job_id = id.0,
            path = %work_dir.display(),
            error = %e,
            "Failed to remove working directory"
        );
    }

    if let Descriptor::File(path) = &descriptor
        && path.starts_with(config.download.descriptor_inbox())
        && let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            job_id = id.0,
            path = %path.display(),
            error = %e,
            "Failed to remove descriptor file"
        );
    }

    let (terminal, event, text) = match outcome {
        JobOutcome::Completed { name, reference } => {
            tracing::info!(job_id = id.0, reference = %reference, "Job completed");
            let text = match &reference {
                DeliveryReference::Url(url) => format!("📤 Uploaded: {url}"),
                DeliveryReference::Message(_) => format!("✅ Delivered: {name}"),
            };
            (JobState::Completed, Event::Completed { id, reference }, text)
        }
        JobOutcome::Cancelled => {
            tracing::info!(job_id = id.0, "Job cancelled");
            (
                JobState::Cancelled,
                Event::Cancelled { id },
                format!("🛑 Cancelled (job {id})"),
            )
        }
        JobOutcome::Failed { stage, error } => {
            tracing::warn!(job_id = id.0, stage = ?stage, error = %error, "Job failed");
            // the requester was already told delivery is under way
            if stage == FailureStage::Delivery {
                errors.record(format!("delivery failed: {error}"), Some(id));
            }
            let text = format!("❌ Failed (job {id}): {error}");
            (JobState::Failed, Event::Failed { id, error }, text)
        }
    };

    registry.finish(id, terminal).await;
    status.post(StatusUpdate::Finish {
        job: id,
        chat,
        text,
    });
    event_tx.send(event).ok();
}
