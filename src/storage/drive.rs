//! Google Drive storage using the resumable upload protocol

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use super::RemoteStorage;
use crate::config::DriveConfig;
use crate::error::{Error, Result};

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    web_content_link: Option<String>,
    #[serde(default)]
    web_view_link: Option<String>,
}

/// Google Drive uploader
///
/// Uploads go through a resumable session: the file metadata is posted first, Drive
/// answers with a session URI in `Location`, and the file body is streamed to it.
pub struct DriveStorage {
    http: reqwest::Client,
    access_token: String,
    upload_base: String,
    folder_id: Option<String>,
}

impl DriveStorage {
    /// Create an uploader from configuration
    pub fn new(config: &DriveConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            access_token: config.access_token.clone(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            folder_id: config.folder_id.clone(),
        })
    }

    async fn open_session(&self, title: &str, size: u64) -> Result<String> {
        let mut metadata = json!({ "name": title });
        if let Some(folder) = &self.folder_id {
            metadata["parents"] = json!([folder]);
        }

        let response = self
            .http
            .post(format!(
                "{}/upload/drive/v3/files?uploadType=resumable&fields=id,webContentLink,webViewLink",
                self.upload_base
            ))
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Length", size.to_string())
            .json(&metadata)
            .timeout(SESSION_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteStorage(format!(
                "upload session rejected (HTTP {status}): {body}"
            )));
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::RemoteStorage("upload session has no Location header".into()))
    }
}

#[async_trait]
impl RemoteStorage for DriveStorage {
    async fn upload(&self, path: &Path, title: &str) -> Result<String> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let session = self.open_session(title, size).await?;
        tracing::debug!(title = %title, size, "Drive upload session opened");

        let response = self
            .http
            .put(&session)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteStorage(format!(
                "upload failed (HTTP {status}): {body}"
            )));
        }

        let uploaded: UploadedFile = response.json().await?;
        tracing::info!(
            title = %title,
            file_id = uploaded.id.as_deref().unwrap_or("?"),
            "Uploaded to Drive"
        );
        uploaded
            .web_content_link
            .or(uploaded.web_view_link)
            .ok_or_else(|| Error::RemoteStorage("Drive returned no link for the upload".into()))
    }

    fn name(&self) -> &'static str {
        "google-drive"
    }
}
