//! Error types for torrent-relay
//!
//! This module provides the error hierarchy used throughout the library:
//! - [`Error`] - the crate-wide error, returned by collaborators and public operations
//! - [`JobError`] - job registry and lifecycle errors
//! - [`EngineError`] - errors reported by the transfer engine
//! - [`DeliveryError`] - errors produced while handing off a finished artifact
//!
//! Job-local failures never escape a job task as errors; the orchestrator turns
//! them into a terminal state plus a report (see `orchestrator::job_task`).

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Destination, JobId};

/// Result type alias for torrent-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for torrent-relay
///
/// Each variant carries enough context to diagnose the failure from a log line.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "telegram.token")
        key: Option<String>,
    },

    /// Another process already holds the instance lock
    #[error("another instance is already running (lock held on {})", path.display())]
    AlreadyRunning {
        /// Path of the lock file that could not be acquired
        path: PathBuf,
    },

    /// Job-related error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Transfer engine error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Delivery error
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// The requester-facing channel rejected a call
    #[error("channel error: {method} failed: {description}")]
    Channel {
        /// API method that failed (e.g., "sendDocument")
        method: String,
        /// Description returned by the channel
        description: String,
    },

    /// The remote storage provider rejected an upload
    #[error("remote storage error: {0}")]
    RemoteStorage(String),

    /// Descriptor could not be interpreted as a magnet link or descriptor file
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// External tool execution failed (aria2c)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, not configured, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Job registry and lifecycle errors
#[derive(Debug, Error)]
pub enum JobError {
    /// No live job with this id
    #[error("job {id} not found")]
    NotFound {
        /// The job id that was not found
        id: JobId,
    },

    /// Metadata did not arrive within the configured bound
    #[error("job {id}: metadata not received within {waited_secs}s")]
    MetadataTimeout {
        /// The job that timed out
        id: JobId,
        /// How long the job waited, in seconds
        waited_secs: u64,
    },

    /// The chosen destination cannot be used (e.g., storage never authenticated)
    #[error("destination {destination} is not available")]
    DestinationUnavailable {
        /// The destination that was requested
        destination: Destination,
    },

    /// Transition not allowed from the job's current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job id
        id: JobId,
        /// The operation that was attempted (e.g., "transition to delivering")
        operation: String,
        /// The state that prevents the operation
        current_state: String,
    },
}

/// Errors reported by the transfer engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine answered an RPC call with an error
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Engine-specific error code
        code: i64,
        /// Engine-provided message
        message: String,
    },

    /// The transfer failed and cannot recover
    #[error("transfer failed: {reason}")]
    TransferFailed {
        /// Reason reported by the engine
        reason: String,
    },

    /// A metadata-dependent call was made before metadata arrived
    #[error("metadata not yet available for transfer {key}")]
    MetadataUnavailable {
        /// Engine-side transfer key
        key: String,
    },

    /// The engine returned a response that could not be interpreted
    #[error("unexpected engine response: {0}")]
    UnexpectedResponse(String),
}

/// Errors produced by the delivery dispatcher
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The artifact was not found where the transfer should have left it
    #[error("artifact not found at {}", path.display())]
    ArtifactMissing {
        /// Expected artifact location
        path: PathBuf,
    },

    /// The artifact exceeds what the destination accepts
    #[error("artifact is {size} bytes, destination accepts at most {limit} bytes")]
    TooLarge {
        /// Artifact size in bytes
        size: u64,
        /// Destination limit in bytes
        limit: u64,
    },

    /// The destination is not configured
    #[error("destination {destination} is not available")]
    Unavailable {
        /// The destination that was requested
        destination: Destination,
    },

    /// Packaging a multi-file artifact failed
    #[error("packaging failed: {0}")]
    Packaging(String),

    /// Direct return through the requester channel failed
    #[error("direct return failed: {0}")]
    DirectReturn(String),

    /// Upload to the remote storage provider failed
    #[error("upload failed: {0}")]
    Upload(String),
}
