//! Configuration types for torrent-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Job working-directory and polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root of the per-job working directories (default: "/tmp/downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Exclusive instance lock file (default: "/tmp/torrent-relay.lock")
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    /// How long to wait for descriptor metadata (default: 300 seconds)
    ///
    /// `None` waits indefinitely; in TOML, `0` means the same. A stop request is
    /// honoured either way.
    #[serde(default = "default_metadata_timeout", with = "optional_duration_serde")]
    pub metadata_timeout: Option<Duration>,

    /// Interval between metadata checks (default: 1 second)
    #[serde(default = "default_metadata_poll_interval", with = "duration_serde")]
    pub metadata_poll_interval: Duration,

    /// Interval between progress polls while transferring (default: 5 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// How long shutdown waits for live jobs to wind down (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            lock_path: default_lock_path(),
            metadata_timeout: default_metadata_timeout(),
            metadata_poll_interval: default_metadata_poll_interval(),
            progress_interval: default_progress_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl DownloadConfig {
    /// Directory where uploaded descriptor files wait for their job
    pub fn descriptor_inbox(&self) -> PathBuf {
        self.download_dir.join(".descriptors")
    }
}

/// Transfer engine (aria2 JSON-RPC) configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// JSON-RPC endpoint (default: "http://127.0.0.1:6800/jsonrpc")
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// RPC secret token (`--rpc-secret`)
    #[serde(default)]
    pub rpc_secret: Option<String>,

    /// Launch a private aria2c daemon at startup (default: false)
    #[serde(default)]
    pub spawn_daemon: bool,

    /// Path to the aria2c executable (searched in PATH if None)
    #[serde(default)]
    pub aria2c_path: Option<PathBuf>,

    /// Peer listen port for a launched daemon (default: 6881)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Peer connection limit for a launched daemon (default: 200)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Timeout for a single RPC call (default: 10 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            rpc_secret: None,
            spawn_daemon: false,
            aria2c_path: None,
            listen_port: default_listen_port(),
            max_connections: default_max_connections(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Telegram Bot API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot access token (required, usually from `TELEGRAM_TOKEN`)
    #[serde(default)]
    pub token: String,

    /// Owner user id (required, usually from `OWNER_ID`)
    #[serde(default)]
    pub owner_id: i64,

    /// Bot API base URL (default: "https://api.telegram.org")
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Long-polling timeout for update fetching (default: 30 seconds)
    #[serde(default = "default_poll_timeout", with = "duration_serde")]
    pub poll_timeout: Duration,

    /// Largest artifact the bot may upload (default: 50 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            owner_id: 0,
            api_base: default_telegram_api_base(),
            poll_timeout: default_poll_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Google Drive configuration
///
/// The access token is obtained outside this crate; when the section is absent the
/// remote upload destination is unavailable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriveConfig {
    /// OAuth access token
    pub access_token: String,

    /// Upload API base URL (default: "https://www.googleapis.com")
    #[serde(default = "default_drive_upload_base")]
    pub upload_base: String,

    /// Folder to upload into (Drive root if None)
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// Owner error-report configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Interval between owner error reports (default: 300 seconds)
    #[serde(default = "default_error_report_interval", with = "duration_serde")]
    pub error_report_interval: Duration,

    /// Maximum buffered error records; the oldest are dropped beyond this (default: 100)
    #[serde(default = "default_error_buffer_capacity")]
    pub error_buffer_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            error_report_interval: default_error_report_interval(),
            error_buffer_capacity: default_error_buffer_capacity(),
        }
    }
}

/// Retry configuration for transient collaborator failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration
///
/// Loaded from an optional TOML file, then overridden from the environment:
///
/// | Variable             | Setting                 |
/// |----------------------|-------------------------|
/// | `TELEGRAM_TOKEN`     | `telegram.token`        |
/// | `OWNER_ID`           | `telegram.owner_id`     |
/// | `DRIVE_ACCESS_TOKEN` | `storage.access_token`  |
/// | `ARIA2_RPC_URL`      | `engine.rpc_url`        |
/// | `ARIA2_RPC_SECRET`   | `engine.rpc_secret`     |
/// | `DOWNLOAD_DIR`       | `download.download_dir` |
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Working directories and polling cadence
    #[serde(default)]
    pub download: DownloadConfig,

    /// Transfer engine connection
    #[serde(default)]
    pub engine: EngineConfig,

    /// Requester-facing channel
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Remote storage provider (None = remote upload unavailable)
    #[serde(default)]
    pub storage: Option<DriveConfig>,

    /// Owner error reports
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Retry policy for engine and channel calls
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from an optional TOML file plus process environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "config",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML configuration text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            message: format!("invalid TOML: {}", e),
            key: None,
        })
    }

    /// Apply overrides from an environment lookup
    ///
    /// The lookup is injected so tests don't touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_TOKEN") {
            self.telegram.token = token;
        }
        if let Some(owner) = lookup("OWNER_ID") {
            self.telegram.owner_id = owner.trim().parse().map_err(|_| {
                Error::config("telegram.owner_id", format!("OWNER_ID is not an integer: {owner}"))
            })?;
        }
        if let Some(dir) = lookup("DOWNLOAD_DIR") {
            self.download.download_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("ARIA2_RPC_URL") {
            self.engine.rpc_url = url;
        }
        if let Some(secret) = lookup("ARIA2_RPC_SECRET") {
            self.engine.rpc_secret = Some(secret);
        }
        if let Some(token) = lookup("DRIVE_ACCESS_TOKEN") {
            match self.storage.as_mut() {
                Some(drive) => drive.access_token = token,
                None => {
                    self.storage = Some(DriveConfig {
                        access_token: token,
                        upload_base: default_drive_upload_base(),
                        folder_id: None,
                    })
                }
            }
        }
        Ok(())
    }

    /// Check that the settings the process cannot start without are present
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.trim().is_empty() {
            return Err(Error::config(
                "telegram.token",
                "TELEGRAM_TOKEN is not set",
            ));
        }
        if self.telegram.owner_id == 0 {
            return Err(Error::config("telegram.owner_id", "OWNER_ID is not set"));
        }
        if let Some(drive) = &self.storage
            && drive.access_token.trim().is_empty()
        {
            return Err(Error::config(
                "storage.access_token",
                "storage section present but access token is empty",
            ));
        }
        if url::Url::parse(&self.engine.rpc_url).is_err() {
            return Err(Error::config(
                "engine.rpc_url",
                format!("not a valid URL: {}", self.engine.rpc_url),
            ));
        }
        if self.download.progress_interval.is_zero() || self.download.metadata_poll_interval.is_zero()
        {
            return Err(Error::config(
                "download.progress_interval",
                "polling intervals must be non-zero",
            ));
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("/tmp/downloads")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/tmp/torrent-relay.lock")
}

fn default_metadata_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_metadata_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:6800/jsonrpc".to_string()
}

fn default_listen_port() -> u16 {
    6881
}

fn default_max_connections() -> u32 {
    200
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_drive_upload_base() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_error_report_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_error_buffer_capacity() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper (0 seconds reads as None)
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.filter(|s| *s > 0).map(Duration::from_secs))
    }
}
