//! Background service starters and startup housekeeping.

use crate::error::Result;
use crate::error_aggregator::spawn_error_notifier;

use super::Orchestrator;

impl Orchestrator {
    /// Start the periodic owner error report
    ///
    /// Stops (after a final flush) once [`shutdown`](Self::shutdown) completes.
    pub fn start_error_notifier(&self) -> tokio::task::JoinHandle<()> {
        let interval = self.config.notifications.error_report_interval;
        let handle = spawn_error_notifier(
            self.errors.clone(),
            self.channel.clone(),
            interval,
            self.shutdown_token.child_token(),
        );
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Error notifier background task started"
        );
        handle
    }

    /// Remove working directories and descriptor files left by a previous process
    ///
    /// Only safe while no job is live; call it once at startup, after the instance lock
    /// is held. Returns the number of entries removed.
    pub async fn remove_stale_artifacts(&self) -> Result<usize> {
        let mut removed = 0;

        let mut entries = tokio::fs::read_dir(&self.config.download.download_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let is_job_dir = name.to_string_lossy().starts_with("job_")
                && entry.file_type().await?.is_dir();
            if is_job_dir {
                tokio::fs::remove_dir_all(entry.path()).await?;
                tracing::info!(path = %entry.path().display(), "Removed stale working directory");
                removed += 1;
            }
        }

        let mut entries = tokio::fs::read_dir(self.config.download.descriptor_inbox()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Startup cleanup finished");
        }
        Ok(removed)
    }
}
