//! Shared engine session used by every job task

use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::traits::{TransferEngine, TransferHandle, TransferStatus};
use crate::config::RetryConfig;
use crate::error::Result;
use crate::retry::with_retry;
use crate::types::Descriptor;

/// Engine wrapper shared by all job tasks
///
/// Adding and removing transfers mutate the engine session and go through one critical
/// section. Status reads are not serialized, so a slow poll for one job never holds up
/// another job's monitor.
pub struct EngineSession {
    engine: Arc<dyn TransferEngine>,
    gate: Mutex<()>,
    retry: RetryConfig,
}

impl EngineSession {
    /// Wrap an engine
    pub fn new(engine: Arc<dyn TransferEngine>, retry: RetryConfig) -> Self {
        Self {
            engine,
            gate: Mutex::new(()),
            retry,
        }
    }

    /// Name of the wrapped engine
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Add a transfer
    ///
    /// Not retried: an add whose response was lost may already have created the
    /// transfer, and a second add would leak it.
    pub async fn add_transfer(
        &self,
        descriptor: &Descriptor,
        save_path: &Path,
    ) -> Result<Arc<dyn TransferHandle>> {
        let _gate = self.gate.lock().await;
        self.engine.add_transfer(descriptor, save_path).await
    }

    /// Remove a transfer, retrying transient failures
    ///
    /// The gate is held per attempt, never across a backoff sleep.
    pub async fn remove_transfer(&self, handle: &dyn TransferHandle) -> Result<()> {
        with_retry(&self.retry, || async {
            let _gate = self.gate.lock().await;
            self.engine.remove_transfer(handle).await
        })
        .await
    }

    /// Whether metadata is available
    pub async fn has_metadata(&self, handle: &dyn TransferHandle) -> Result<bool> {
        with_retry(&self.retry, || handle.has_metadata()).await
    }

    /// Content name
    pub async fn name(&self, handle: &dyn TransferHandle) -> Result<String> {
        with_retry(&self.retry, || handle.name()).await
    }

    /// Whether the payload is complete
    pub async fn is_complete(&self, handle: &dyn TransferHandle) -> Result<bool> {
        with_retry(&self.retry, || handle.is_complete()).await
    }

    /// Progress snapshot
    pub async fn status(&self, handle: &dyn TransferHandle) -> Result<TransferStatus> {
        with_retry(&self.retry, || handle.status()).await
    }
}
