//! Shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::Event;

use super::Orchestrator;

impl Orchestrator {
    /// Gracefully shut down the orchestrator
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new jobs ([`Error::ShuttingDown`](crate::Error::ShuttingDown))
    /// 2. Requests a stop for every job that is not delivering
    /// 3. Waits up to `shutdown_timeout` for the registry to drain; deliveries in flight
    ///    are allowed to finish
    /// 4. Stops background services and emits [`Event::Shutdown`]
    ///
    /// Calling it again is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new jobs");

        let signalled = self.registry.close().await;
        tracing::info!(signalled, "Requested stop for all active jobs");

        let timeout = self.config.download.shutdown_timeout;
        match tokio::time::timeout(timeout, self.wait_for_active_jobs()).await {
            Ok(()) => tracing::info!("All jobs finished"),
            Err(_) => {
                let remaining = self.registry.len().await;
                tracing::warn!(
                    remaining,
                    timeout_secs = timeout.as_secs(),
                    "Timeout waiting for jobs to finish, proceeding with shutdown"
                );
            }
        }

        self.shutdown_token.cancel();
        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether new jobs are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    async fn wait_for_active_jobs(&self) {
        loop {
            let active = self.registry.len().await;
            if active == 0 {
                return;
            }
            tracing::debug!(active, "Waiting for jobs to finish");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
