//! Per-job working directory with guaranteed release

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::JobId;

/// A job's working directory under the download root
///
/// The directory is reserved when the job starts and created lazily by whoever writes
/// into it first (the engine, or packaging). [`release`](Self::release) removes it; if a
/// task unwinds without releasing, `Drop` removes it synchronously instead. No two jobs
/// share a working directory because job ids are never reused.
#[derive(Debug)]
pub struct WorkingArtifact {
    dir: PathBuf,
    released: bool,
}

impl WorkingArtifact {
    /// Reserve the working directory for a job
    pub fn for_job(download_root: &Path, id: JobId) -> Self {
        Self {
            dir: download_root.join(format!("job_{}", id.0)),
            released: false,
        }
    }

    /// Working directory path
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Remove the working directory and everything in it
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WorkingArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::warn!(path = %self.dir.display(), "Working directory removed on drop");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    path = %self.dir.display(),
                    error = %e,
                    "Failed to remove working directory on drop"
                );
            }
        }
    }
}
