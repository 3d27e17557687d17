//! Per-job task execution -- metadata wait, transfer, delivery and cleanup.
//!
//! Split into focused submodules:
//! - [`context`] - Shared state handed to the task and small helpers
//! - [`orchestration`] - Top-level job lifecycle up to the delivery outcome
//! - [`finalization`] - Cleanup, terminal state and final status

mod context;
mod finalization;
mod orchestration;

pub(crate) use context::JobContext;
pub(crate) use orchestration::run_job;
