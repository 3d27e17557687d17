//! Requester-facing channel
//!
//! The orchestrator renders status text and returns artifacts through the
//! [`RequesterChannel`] trait; [`TelegramChannel`] implements it over the Telegram Bot
//! API and also exposes the polling primitives the bot front end needs.

mod telegram;

pub use telegram::{
    CallbackQuery, Chat, Document, Message, TelegramChannel, Update, User,
};

use async_trait::async_trait;
use std::path::Path;

use crate::types::{ChatRef, MessageRef};

/// Where status is shown and artifacts are returned
///
/// All status I/O for live jobs goes through a single writer task in the orchestrator,
/// so implementations never see two concurrent edits of the same message.
#[async_trait]
pub trait RequesterChannel: Send + Sync {
    /// Post a new status message
    async fn send_status(&self, chat: ChatRef, text: &str) -> crate::Result<MessageRef>;

    /// Replace the text of an existing status message
    ///
    /// Editing a message to its current text is not an error.
    async fn edit_status(&self, message: MessageRef, text: &str) -> crate::Result<()>;

    /// Send a file back to the requester
    async fn send_artifact(&self, chat: ChatRef, path: &Path) -> crate::Result<MessageRef>;

    /// Send a message to the owner
    async fn notify_owner(&self, text: &str) -> crate::Result<()>;

    /// Largest artifact [`send_artifact`](Self::send_artifact) accepts, if limited
    fn max_artifact_bytes(&self) -> Option<u64> {
        None
    }
}
