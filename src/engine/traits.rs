//! Traits and types for the transfer engine capability

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::types::Descriptor;

/// Point-in-time status of a transfer as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStatus {
    /// Fraction of the payload present on disk (0.0 to 1.0)
    pub fraction_done: f64,
    /// Current download rate in bytes per second
    pub download_rate: u64,
}

/// One transfer inside the engine
///
/// Handles are exclusively owned by the job that created them. They stay valid until
/// [`TransferEngine::remove_transfer`] is called, which the orchestrator does on every
/// terminal transition.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Engine-side identifier of the transfer currently being followed
    fn key(&self) -> String;

    /// Every engine-side identifier this handle has touched
    ///
    /// A magnet transfer starts as a metadata-only download that is followed by the
    /// real transfer; both must be removed on release.
    fn transfer_keys(&self) -> Vec<String>;

    /// Whether the descriptor has been resolved into content metadata
    async fn has_metadata(&self) -> crate::Result<bool>;

    /// Content name
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MetadataUnavailable`](crate::error::EngineError) when called
    /// before [`has_metadata`](Self::has_metadata) reported `true`.
    async fn name(&self) -> crate::Result<String>;

    /// Whether the payload is fully on disk
    ///
    /// # Errors
    ///
    /// An unrecoverable transfer error surfaces as
    /// [`EngineError::TransferFailed`](crate::error::EngineError).
    async fn is_complete(&self) -> crate::Result<bool>;

    /// Progress and rate snapshot
    async fn status(&self) -> crate::Result<TransferStatus>;
}

/// Peer-to-peer transfer engine
///
/// # Examples
///
/// ```no_run
/// use torrent_relay::engine::{Aria2Engine, TransferEngine};
/// use torrent_relay::config::EngineConfig;
/// use torrent_relay::types::Descriptor;
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = Aria2Engine::new(&EngineConfig::default())?;
/// let descriptor = Descriptor::parse_magnet("magnet:?xt=urn:btih:abc").unwrap();
/// let handle = engine.add_transfer(&descriptor, Path::new("/tmp/downloads/job_1")).await?;
/// while !handle.has_metadata().await? {
///     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
/// }
/// println!("resolved: {}", handle.name().await?);
/// engine.remove_transfer(handle.as_ref()).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Start resolving a descriptor, saving payload under `save_path`
    async fn add_transfer(
        &self,
        descriptor: &Descriptor,
        save_path: &Path,
    ) -> crate::Result<Arc<dyn TransferHandle>>;

    /// Remove a transfer from the engine
    ///
    /// Removing a transfer the engine already forgot is not an error.
    async fn remove_transfer(&self, handle: &dyn TransferHandle) -> crate::Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
