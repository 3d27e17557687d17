//! Transfer engine capability
//!
//! The orchestrator only ever talks to the engine through the [`TransferEngine`] and
//! [`TransferHandle`] traits, wrapped in an [`EngineSession`] that serializes the calls
//! mutating the shared engine session.
//!
//! - [`Aria2Engine`]: drives an aria2 daemon over JSON-RPC
//! - [`spawn_aria2_daemon`]: launches a private aria2c process when configured

mod aria2;
mod session;
mod traits;

pub use aria2::{
    Aria2Client, Aria2Daemon, Aria2Engine, Aria2Handle, BitTorrentInfo, BitTorrentStatus,
    TellStatus, spawn_aria2_daemon,
};
pub use session::EngineSession;
pub use traits::{TransferEngine, TransferHandle, TransferStatus};
