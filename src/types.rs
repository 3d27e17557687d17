//! Core types for torrent-relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Prefix every magnet descriptor must start with
pub const MAGNET_PREFIX: &str = "magnet:?xt=";

/// Unique identifier for a download job
///
/// Assigned monotonically by the [`JobRegistry`](crate::registry::JobRegistry) and never
/// reused within the lifetime of a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Identifier of a descriptor that is still waiting for a destination choice
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingId(pub u64);

impl std::fmt::Display for PendingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of a transfer: a magnet link or a descriptor (.torrent) file on disk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Descriptor {
    /// Magnet URI (`magnet:?xt=...`)
    Magnet(String),
    /// Path to a descriptor file
    File(PathBuf),
}

impl Descriptor {
    /// Interpret free text as a magnet descriptor
    ///
    /// Returns `None` unless the trimmed text starts with `magnet:?xt=`.
    pub fn parse_magnet(text: &str) -> Option<Self> {
        let text = text.trim();
        text.starts_with(MAGNET_PREFIX)
            .then(|| Descriptor::Magnet(text.to_string()))
    }

    /// Short human-readable label used in logs and status messages
    ///
    /// For magnets this is the `dn` (display name) parameter when present.
    pub fn label(&self) -> String {
        match self {
            Descriptor::Magnet(uri) => url::Url::parse(uri)
                .ok()
                .and_then(|u| {
                    u.query_pairs()
                        .find(|(k, _)| k == "dn")
                        .map(|(_, v)| v.into_owned())
                })
                .unwrap_or_else(|| "magnet link".to_string()),
            Descriptor::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }
}

/// Where a completed artifact is delivered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Send the artifact back through the requester-facing channel
    DirectReturn,
    /// Upload the artifact to the remote storage provider and return a URL
    RemoteUpload,
}

impl Destination {
    /// Every destination, in the order they are offered to requesters
    pub const ALL: [Destination; 2] = [Destination::DirectReturn, Destination::RemoteUpload];
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::DirectReturn => write!(f, "direct return"),
            Destination::RemoteUpload => write!(f, "remote upload"),
        }
    }
}

/// Job lifecycle state
///
/// ```text
/// AwaitingMetadata -> Transferring -> Delivering -> Completed
///        |                 |              |
///        +-> Failed <------+--------------+
///        +-> Cancelled <---+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Descriptor handed to the engine, waiting for metadata
    AwaitingMetadata,
    /// Metadata known, payload transferring
    Transferring,
    /// Artifact handed to the delivery dispatcher; cancellation no longer aborts
    Delivering,
    /// Delivered successfully
    Completed,
    /// Terminated by an error
    Failed,
    /// Stopped on request
    Cancelled,
}

impl JobState {
    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (AwaitingMetadata, Transferring | Failed | Cancelled)
                | (Transferring, Delivering | Failed | Cancelled)
                | (Delivering, Completed | Failed)
        )
    }
}

/// Conversation where a requester talks to the relay
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatRef(pub i64);

/// A message posted in a conversation (editable status message, returned artifact)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Conversation holding the message
    pub chat: ChatRef,
    /// Message identifier within the conversation
    pub message_id: i64,
}

/// Point-in-time transfer progress
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Whole percent complete (0 to 100)
    pub percent: u8,
    /// Current transfer rate in bytes per second
    pub rate_per_second: u64,
}

impl ProgressSnapshot {
    /// Build a snapshot from an engine fraction (0.0 to 1.0); out-of-range values are clamped
    pub fn from_fraction(fraction_done: f64, rate_per_second: u64) -> Self {
        let fraction = if fraction_done.is_finite() {
            fraction_done.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            percent: (fraction * 100.0).floor() as u8,
            rate_per_second,
        }
    }
}

/// What a successful delivery produced
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeliveryReference {
    /// Message carrying the returned artifact
    Message(MessageRef),
    /// Retrievable URL of the uploaded artifact
    Url(String),
}

impl std::fmt::Display for DeliveryReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryReference::Message(m) => write!(f, "message {}", m.message_id),
            DeliveryReference::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Read-only view of a live job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job id
    pub id: JobId,
    /// Transfer source
    pub descriptor: Descriptor,
    /// Delivery destination
    pub destination: Destination,
    /// Current lifecycle state
    pub state: JobState,
    /// Content name, known once metadata arrived
    pub name: Option<String>,
    /// Latest progress reported by the monitor
    pub progress: Option<ProgressSnapshot>,
    /// Whether a stop was requested
    pub cancel_requested: bool,
    /// Creation time (diagnostics only)
    pub created_at: DateTime<Utc>,
}

/// A failure waiting to be reported to the owner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Job the failure belongs to, if any
    pub job_id: Option<JobId>,
    /// Failure description
    pub message: String,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// Result of a stop request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job will stop at its next suspension point
    Requested,
    /// The job is delivering; the hand-off finishes and the request is only recorded
    DeferredUntilDelivered,
}

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job registered and its task spawned
    JobCreated {
        /// Job id
        id: JobId,
        /// Chosen destination
        destination: Destination,
    },

    /// Metadata arrived; the transfer proper begins
    MetadataResolved {
        /// Job id
        id: JobId,
        /// Content name
        name: String,
    },

    /// Transfer progress update
    Progress {
        /// Job id
        id: JobId,
        /// Latest snapshot
        snapshot: ProgressSnapshot,
    },

    /// Artifact handed to the delivery dispatcher
    Delivering {
        /// Job id
        id: JobId,
    },

    /// Delivery succeeded
    Completed {
        /// Job id
        id: JobId,
        /// Delivery reference
        reference: DeliveryReference,
    },

    /// Job failed
    Failed {
        /// Job id
        id: JobId,
        /// Failure description
        error: String,
    },

    /// Job stopped on request
    Cancelled {
        /// Job id
        id: JobId,
    },

    /// Orchestrator is shutting down
    Shutdown,
}

impl Event {
    /// Job the event refers to, if any
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Event::JobCreated { id, .. }
            | Event::MetadataResolved { id, .. }
            | Event::Progress { id, .. }
            | Event::Delivering { id }
            | Event::Completed { id, .. }
            | Event::Failed { id, .. }
            | Event::Cancelled { id } => Some(*id),
            Event::Shutdown => None,
        }
    }

    /// Whether the event marks a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Completed { .. } | Event::Failed { .. } | Event::Cancelled { .. }
        )
    }
}
