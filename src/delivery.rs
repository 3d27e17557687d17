//! Delivery dispatcher and artifact packaging
//!
//! The dispatcher hands a finished artifact to its destination and reports what the
//! hand-off produced. It never deletes anything: removing the artifact is the job's
//! cleanup step, which runs whatever the delivery outcome.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::channel::RequesterChannel;
use crate::error::DeliveryError;
use crate::storage::RemoteStorage;
use crate::types::{ChatRef, DeliveryReference, Destination};

/// Routes artifacts to the chosen destination
pub struct DeliveryDispatcher {
    channel: Arc<dyn RequesterChannel>,
    storage: Option<Arc<dyn RemoteStorage>>,
}

impl DeliveryDispatcher {
    /// Create a dispatcher; without storage the remote upload destination is unavailable
    pub fn new(
        channel: Arc<dyn RequesterChannel>,
        storage: Option<Arc<dyn RemoteStorage>>,
    ) -> Self {
        Self { channel, storage }
    }

    /// Whether `destination` can currently be served
    pub fn is_available(&self, destination: Destination) -> bool {
        match destination {
            Destination::DirectReturn => true,
            Destination::RemoteUpload => self.storage.is_some(),
        }
    }

    /// Destinations a requester may choose from
    pub fn available_destinations(&self) -> Vec<Destination> {
        Destination::ALL
            .into_iter()
            .filter(|d| self.is_available(*d))
            .collect()
    }

    /// Hand `artifact` (a single file) to `destination`
    pub async fn deliver(
        &self,
        artifact: &Path,
        destination: Destination,
        chat: ChatRef,
        title: &str,
    ) -> Result<DeliveryReference, DeliveryError> {
        let metadata = match tokio::fs::metadata(artifact).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(DeliveryError::Packaging(format!(
                    "{} is not a single file",
                    artifact.display()
                )));
            }
            Err(_) => {
                return Err(DeliveryError::ArtifactMissing {
                    path: artifact.to_path_buf(),
                });
            }
        };
        let size = metadata.len();

        match destination {
            Destination::DirectReturn => {
                if let Some(limit) = self.channel.max_artifact_bytes()
                    && size > limit
                {
                    return Err(DeliveryError::TooLarge { size, limit });
                }
                let message = self
                    .channel
                    .send_artifact(chat, artifact)
                    .await
                    .map_err(|e| DeliveryError::DirectReturn(e.to_string()))?;
                Ok(DeliveryReference::Message(message))
            }
            Destination::RemoteUpload => {
                let storage = self
                    .storage
                    .as_ref()
                    .ok_or(DeliveryError::Unavailable { destination })?;
                let url = storage
                    .upload(artifact, title)
                    .await
                    .map_err(|e| DeliveryError::Upload(e.to_string()))?;
                Ok(DeliveryReference::Url(url))
            }
        }
    }
}

/// Turn finished content into a single deliverable file
///
/// A file is returned as is. A directory (multi-file content) is zipped into
/// `<work_dir>/<name>.zip`; the archive lives in the job's working directory and goes
/// away with it.
pub async fn package_artifact(content: &Path, work_dir: &Path) -> Result<PathBuf, DeliveryError> {
    let metadata = tokio::fs::metadata(content)
        .await
        .map_err(|_| DeliveryError::ArtifactMissing {
            path: content.to_path_buf(),
        })?;
    if metadata.is_file() {
        return Ok(content.to_path_buf());
    }

    let name = content
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let archive = work_dir.join(format!("{name}.zip"));

    let source = content.to_path_buf();
    let dest = archive.clone();
    tokio::task::spawn_blocking(move || zip_directory(&source, &dest))
        .await
        .map_err(|e| DeliveryError::Packaging(format!("packaging task failed: {e}")))??;

    tracing::debug!(source = %content.display(), archive = %archive.display(), "Packaged directory");
    Ok(archive)
}

/// Write every entry under `source` into a zip at `dest`, rooted at the directory name
fn zip_directory(source: &Path, dest: &Path) -> Result<(), DeliveryError> {
    let packaging = |e: &dyn std::fmt::Display| DeliveryError::Packaging(e.to_string());

    let root_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = std::fs::File::create(dest).map_err(|e| packaging(&e))?;
    let mut writer = zip::ZipWriter::new(file);
    // payloads are mostly media that doesn't compress; zip64 for large files
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .large_file(true);

    let mut buf = vec![0u8; 64 * 1024];
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| packaging(&e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| packaging(&e))?;
        let mut name = root_name.clone();
        for component in relative.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|e| packaging(&e))?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options).map_err(|e| packaging(&e))?;
            let mut input = std::fs::File::open(entry.path()).map_err(|e| packaging(&e))?;
            loop {
                let read = input.read(&mut buf).map_err(|e| packaging(&e))?;
                if read == 0 {
                    break;
                }
                writer.write_all(&buf[..read]).map_err(|e| packaging(&e))?;
            }
        }
    }

    writer.finish().map_err(|e| packaging(&e))?;
    Ok(())
}
