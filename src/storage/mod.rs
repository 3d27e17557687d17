//! Remote storage provider
//!
//! Authentication is bootstrapped outside this crate; a [`RemoteStorage`] is only
//! constructed when credentials are already available, and the remote upload
//! destination is unavailable otherwise.

mod drive;

pub use drive::DriveStorage;

use async_trait::async_trait;
use std::path::Path;

/// Uploads artifacts and returns a retrievable URL
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Upload `path` under `title`, returning a URL the requester can fetch
    async fn upload(&self, path: &Path, title: &str) -> crate::Result<String>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
