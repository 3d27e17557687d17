//! Single-instance lock
//!
//! Only one relay process may drive a download directory and an engine session. The
//! guard takes an advisory exclusive lock on a lock file at startup; failure to get it
//! is fatal and never retried.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Exclusive process lock, held until dropped
pub struct InstanceGuard {
    path: PathBuf,
    // the OS lock lives as long as this descriptor stays open
    _lock: RwLock<File>,
}

impl InstanceGuard {
    /// Take the exclusive lock on `path`, creating the file if needed
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] when another process (or another guard in this
    /// process) holds the lock.
    pub fn acquire_exclusive(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        // no truncate: the current holder's pid must survive a failed attempt
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut lock = RwLock::new(file);

        match lock.try_write() {
            Ok(mut guard) => {
                guard.set_len(0)?;
                write!(&mut *guard, "{}", std::process::id())?;
                guard.flush()?;
                // Dropping the guard would unlock; forgetting it keeps the lock bound to
                // the open descriptor, which is closed when `_lock` drops.
                std::mem::forget(guard);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return Err(Error::AlreadyRunning {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(path = %path.display(), pid = std::process::id(), "Instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for InstanceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("path", &self.path)
            .finish()
    }
}
