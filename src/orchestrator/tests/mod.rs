use super::test_helpers::*;
use super::*;
use crate::error::{Error, JobError};
use crate::types::{CancelOutcome, DeliveryReference, Descriptor, Destination, Event, JobState};

mod isolation;
mod lifecycle;

fn request(descriptor: Descriptor, destination: Destination) -> JobRequest {
    JobRequest {
        descriptor,
        destination,
        chat: REQUESTER,
        status_message: None,
    }
}

fn work_dir(orchestrator: &Orchestrator, id: crate::types::JobId) -> std::path::PathBuf {
    orchestrator
        .get_config()
        .download
        .download_dir
        .join(format!("job_{}", id.0))
}
