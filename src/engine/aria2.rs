//! aria2 JSON-RPC transfer engine
//!
//! aria2 resolves a magnet link as a metadata-only download which, once complete, is
//! *followed by* the real transfer under a new gid. [`Aria2Handle`] follows that hop
//! transparently and remembers every gid it touched so removal cleans up both.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};

use super::traits::{TransferEngine, TransferHandle, TransferStatus};
use crate::config::EngineConfig;
use crate::error::{EngineError, Error, Result};
use crate::types::Descriptor;

const STATUS_KEYS: [&str; 8] = [
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "followedBy",
    "errorMessage",
    "bittorrent",
];

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

/// Subset of `aria2.tellStatus` the engine relies on
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TellStatus {
    /// Transfer gid
    #[serde(default)]
    pub gid: String,
    /// `active`, `waiting`, `paused`, `error`, `complete` or `removed`
    pub status: String,
    /// Payload size in bytes (0 while unknown)
    #[serde(default, deserialize_with = "number_string")]
    pub total_length: u64,
    /// Bytes on disk
    #[serde(default, deserialize_with = "number_string")]
    pub completed_length: u64,
    /// Bytes per second
    #[serde(default, deserialize_with = "number_string")]
    pub download_speed: u64,
    /// Gids of transfers spawned by this one (metadata download -> real transfer)
    #[serde(default)]
    pub followed_by: Vec<String>,
    /// Error description when `status == "error"`
    #[serde(default)]
    pub error_message: Option<String>,
    /// BitTorrent-specific fields
    #[serde(default)]
    pub bittorrent: Option<BitTorrentStatus>,
}

/// `bittorrent` object of a status response
#[derive(Debug, Clone, Deserialize)]
pub struct BitTorrentStatus {
    /// Present once metadata is known
    #[serde(default)]
    pub info: Option<BitTorrentInfo>,
}

/// `bittorrent.info` object of a status response
#[derive(Debug, Clone, Deserialize)]
pub struct BitTorrentInfo {
    /// Content name
    pub name: String,
}

impl TellStatus {
    fn content_name(&self) -> Option<&str> {
        self.bittorrent
            .as_ref()
            .and_then(|bt| bt.info.as_ref())
            .map(|info| info.name.as_str())
    }

    fn check_failed(&self) -> Result<()> {
        match self.status.as_str() {
            "error" => Err(EngineError::TransferFailed {
                reason: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "aria2 reported an error".to_string()),
            }
            .into()),
            "removed" => Err(EngineError::TransferFailed {
                reason: "transfer was removed from the engine".to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

// aria2 encodes every integer as a JSON string
fn number_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let text = Option::<String>::deserialize(deserializer)?;
    Ok(text.and_then(|t| t.parse().ok()).unwrap_or(0))
}

/// Minimal aria2 JSON-RPC client
pub struct Aria2Client {
    http: reqwest::Client,
    url: String,
    secret: Option<String>,
    next_id: AtomicU64,
}

impl Aria2Client {
    /// Create a client for the given endpoint
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            secret,
            next_id: AtomicU64::new(1),
        })
    }

    /// Invoke an RPC method; the secret token is prepended automatically
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut full_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            full_params.push(Value::String(format!("token:{secret}")));
        }
        full_params.extend(params);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": full_params,
        });

        // aria2 answers RPC faults with a 4xx and a JSON body, so the body is parsed
        // regardless of the HTTP status
        let response = self.http.post(&self.url).json(&body).send().await?;
        let http_status = response.status();
        let text = response.text().await?;
        let parsed: RpcResponse = serde_json::from_str(&text).map_err(|_| {
            EngineError::UnexpectedResponse(format!("{method}: HTTP {http_status}: {text}"))
        })?;

        if let Some(fault) = parsed.error {
            return Err(EngineError::Rpc {
                code: fault.code,
                message: fault.message,
            }
            .into());
        }
        parsed.result.ok_or_else(|| {
            EngineError::UnexpectedResponse(format!("{method} returned no result")).into()
        })
    }

    /// `aria2.addUri`, returns the new gid
    pub async fn add_uri(&self, uri: &str, options: Value) -> Result<String> {
        let result = self
            .call("aria2.addUri", vec![json!([uri]), options])
            .await?;
        gid_from(result, "aria2.addUri")
    }

    /// `aria2.addTorrent`, returns the new gid
    pub async fn add_torrent(&self, torrent: &[u8], options: Value) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(torrent);
        let result = self
            .call("aria2.addTorrent", vec![json!(encoded), json!([]), options])
            .await?;
        gid_from(result, "aria2.addTorrent")
    }

    /// `aria2.tellStatus` restricted to the keys the engine reads
    pub async fn tell_status(&self, gid: &str) -> Result<TellStatus> {
        let result = self
            .call("aria2.tellStatus", vec![json!(gid), json!(STATUS_KEYS)])
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `aria2.forceRemove`
    pub async fn force_remove(&self, gid: &str) -> Result<()> {
        self.call("aria2.forceRemove", vec![json!(gid)]).await?;
        Ok(())
    }

    /// `aria2.removeDownloadResult`
    pub async fn remove_download_result(&self, gid: &str) -> Result<()> {
        self.call("aria2.removeDownloadResult", vec![json!(gid)])
            .await?;
        Ok(())
    }

    /// `aria2.getVersion`, used as a liveness check
    pub async fn get_version(&self) -> Result<String> {
        let result = self.call("aria2.getVersion", Vec::new()).await?;
        result
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::UnexpectedResponse("aria2.getVersion: missing version".into()).into()
            })
    }
}

fn gid_from(result: Value, method: &str) -> Result<String> {
    result
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EngineError::UnexpectedResponse(format!("{method}: gid is not a string")).into())
}

fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::Engine(EngineError::Rpc { message, .. })) if message.contains("not found") => {
            Ok(())
        }
        other => other,
    }
}

struct HandleState {
    current: String,
    keys: Vec<String>,
    metadata_ready: bool,
}

/// Handle to one aria2 transfer
pub struct Aria2Handle {
    client: Arc<Aria2Client>,
    state: Mutex<HandleState>,
}

impl Aria2Handle {
    fn new(client: Arc<Aria2Client>, gid: String, metadata_ready: bool) -> Self {
        Self {
            client,
            state: Mutex::new(HandleState {
                current: gid.clone(),
                keys: vec![gid],
                metadata_ready,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current gid plus whether metadata is known, without holding the lock across awaits
    fn current(&self) -> (String, bool) {
        let state = self.state();
        (state.current.clone(), state.metadata_ready)
    }
}

#[async_trait]
impl TransferHandle for Aria2Handle {
    fn key(&self) -> String {
        self.state().current.clone()
    }

    fn transfer_keys(&self) -> Vec<String> {
        self.state().keys.clone()
    }

    async fn has_metadata(&self) -> Result<bool> {
        let (gid, ready) = self.current();
        if ready {
            return Ok(true);
        }

        let status = self.client.tell_status(&gid).await?;
        status.check_failed()?;

        if let Some(next) = status.followed_by.first() {
            tracing::debug!(metadata_gid = %gid, gid = %next, "Following resolved transfer");
            let mut state = self.state();
            state.current = next.clone();
            if !state.keys.contains(next) {
                state.keys.push(next.clone());
            }
            state.metadata_ready = true;
            return Ok(true);
        }
        Ok(false)
    }

    async fn name(&self) -> Result<String> {
        let (gid, ready) = self.current();
        if !ready {
            return Err(EngineError::MetadataUnavailable { key: gid }.into());
        }
        let status = self.client.tell_status(&gid).await?;
        status.content_name().map(str::to_string).ok_or_else(|| {
            EngineError::UnexpectedResponse(format!("transfer {gid} has no content name")).into()
        })
    }

    async fn is_complete(&self) -> Result<bool> {
        let (gid, ready) = self.current();
        if !ready {
            // the metadata download reports "complete" before the payload even starts
            return Ok(false);
        }
        let status = self.client.tell_status(&gid).await?;
        status.check_failed()?;
        Ok(status.status == "complete")
    }

    async fn status(&self) -> Result<TransferStatus> {
        let (gid, _) = self.current();
        let status = self.client.tell_status(&gid).await?;
        status.check_failed()?;
        let fraction_done = if status.total_length > 0 {
            status.completed_length as f64 / status.total_length as f64
        } else {
            0.0
        };
        Ok(TransferStatus {
            fraction_done,
            download_rate: status.download_speed,
        })
    }
}

/// Transfer engine backed by an aria2 daemon
///
/// Seeding is disabled per transfer (`seed-time=0`) so a transfer reports complete as
/// soon as the payload is on disk.
pub struct Aria2Engine {
    client: Arc<Aria2Client>,
}

impl Aria2Engine {
    /// Connect to the endpoint named in the configuration
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Aria2Client::new(
            config.rpc_url.clone(),
            config.rpc_secret.clone(),
            config.request_timeout,
        )?;
        Ok(Self::with_client(Arc::new(client)))
    }

    /// Use an existing client
    pub fn with_client(client: Arc<Aria2Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransferEngine for Aria2Engine {
    async fn add_transfer(
        &self,
        descriptor: &Descriptor,
        save_path: &Path,
    ) -> Result<Arc<dyn TransferHandle>> {
        let options = json!({
            "dir": save_path.to_string_lossy(),
            "seed-time": "0",
        });

        let handle = match descriptor {
            Descriptor::Magnet(uri) => {
                let gid = self.client.add_uri(uri, options).await?;
                Aria2Handle::new(self.client.clone(), gid, false)
            }
            Descriptor::File(path) => {
                let torrent = tokio::fs::read(path).await?;
                let gid = self.client.add_torrent(&torrent, options).await?;
                Aria2Handle::new(self.client.clone(), gid, true)
            }
        };

        tracing::debug!(gid = %handle.key(), save_path = %save_path.display(), "Transfer added");
        Ok(Arc::new(handle))
    }

    async fn remove_transfer(&self, handle: &dyn TransferHandle) -> Result<()> {
        for gid in handle.transfer_keys() {
            ignore_missing(self.client.force_remove(&gid).await)?;
            // the result may not exist yet right after a force-remove; not worth failing over
            if let Err(e) = self.client.remove_download_result(&gid).await {
                tracing::debug!(gid = %gid, error = %e, "Could not purge download result");
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "aria2"
    }
}

/// A private aria2c process launched by [`spawn_aria2_daemon`]
///
/// The process is killed when this value is dropped.
pub struct Aria2Daemon {
    child: Child,
}

impl Aria2Daemon {
    /// Kill the daemon and wait for it to exit
    pub async fn shutdown(mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

/// Launch `aria2c --enable-rpc` and wait until it answers RPC calls
///
/// The binary comes from `engine.aria2c_path` or is located in `PATH`.
pub async fn spawn_aria2_daemon(config: &EngineConfig, download_dir: &Path) -> Result<Aria2Daemon> {
    let binary = match &config.aria2c_path {
        Some(path) => path.clone(),
        None => which::which("aria2c")
            .map_err(|_| Error::NotSupported("aria2c not found in PATH".to_string()))?,
    };

    let rpc_port = url::Url::parse(&config.rpc_url)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(6800);

    let mut command = Command::new(&binary);
    command
        .arg("--enable-rpc")
        .arg(format!("--rpc-listen-port={rpc_port}"))
        .arg(format!("--listen-port={}", config.listen_port))
        .arg(format!("--bt-max-peers={}", config.max_connections))
        .arg("--max-overall-download-limit=0")
        .arg("--max-overall-upload-limit=0")
        .arg("--seed-time=0")
        .arg(format!("--dir={}", download_dir.display()))
        .arg("--quiet=true")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(secret) = &config.rpc_secret {
        command.arg(format!("--rpc-secret={secret}"));
    }

    let mut child = command
        .spawn()
        .map_err(|e| Error::ExternalTool(format!("Failed to execute aria2c: {}", e)))?;

    let client = Aria2Client::new(
        config.rpc_url.clone(),
        config.rpc_secret.clone(),
        Duration::from_secs(1),
    )?;

    for _ in 0..50 {
        if let Some(status) = child.try_wait()? {
            return Err(Error::ExternalTool(format!(
                "aria2c exited during startup with {status}"
            )));
        }
        if let Ok(version) = client.get_version().await {
            tracing::info!(
                version = %version,
                binary = %binary.display(),
                pid = child.id(),
                rpc_port,
                "aria2 daemon ready"
            );
            return Ok(Aria2Daemon { child });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Err(Error::ExternalTool(
        "aria2c did not answer RPC calls within 5 seconds".to_string(),
    ))
}
