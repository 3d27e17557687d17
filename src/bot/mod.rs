//! Requester-facing front end
//!
//! Polls Telegram for updates and turns them into orchestrator calls: a magnet link or
//! an uploaded `.torrent` file becomes a pending descriptor, the requester picks a
//! destination from an inline keyboard, and the press starts the job. The owner can list
//! and stop live jobs.

mod pending;

pub use pending::{Command, DEFAULT_PENDING_CAPACITY, DestinationChoice, PendingDescriptors};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::channel::{CallbackQuery, Message, RequesterChannel, TelegramChannel, Update};
use crate::error::Result;
use crate::orchestrator::{JobRequest, Orchestrator};
use crate::types::{CancelOutcome, ChatRef, Descriptor, Destination, JobSnapshot, JobState};

/// Longest pause between failed polls
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);

const GREETING: &str = "👋 Send a magnet link or a .torrent file and choose where the result should go.";
const OWNER_ONLY: &str = "⛔ This command is only available to the owner.";

/// Telegram front end driving an [`Orchestrator`]
pub struct Bot {
    telegram: Arc<TelegramChannel>,
    orchestrator: Orchestrator,
    pending: PendingDescriptors,
    inbox: PathBuf,
    offset: Option<i64>,
}

impl Bot {
    /// Create a front end; uploaded descriptors are stored in the orchestrator's inbox
    pub fn new(telegram: Arc<TelegramChannel>, orchestrator: Orchestrator) -> Self {
        let inbox = orchestrator.get_config().download.descriptor_inbox();
        Self {
            telegram,
            orchestrator,
            pending: PendingDescriptors::default(),
            inbox,
            offset: None,
        }
    }

    /// Poll and handle updates until `shutdown` fires
    ///
    /// Polling failures are logged and retried with a growing pause; they never end
    /// the loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Bot polling started");
        let mut failures: u32 = 0;

        loop {
            let updates = tokio::select! {
                _ = shutdown.cancelled() => break,
                updates = self.telegram.get_updates(self.offset) => updates,
            };

            match updates {
                Ok(updates) => {
                    failures = 0;
                    for update in updates {
                        self.offset = Some(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = (Duration::from_secs(1) * 2u32.saturating_pow(failures.min(5)))
                        .min(MAX_POLL_BACKOFF);
                    tracing::warn!(error = %e, failures, pause_secs = pause.as_secs(), "Polling for updates failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        }
        tracing::info!("Bot polling stopped");
    }

    /// Handle one update; failures are logged and buffered for the owner report
    pub async fn handle_update(&mut self, update: Update) {
        let result = if let Some(query) = update.callback_query {
            self.handle_callback(query).await
        } else if let Some(message) = update.message {
            self.handle_message(message).await
        } else {
            Ok(())
        };

        if let Err(e) = result {
            tracing::warn!(update_id = update.update_id, error = %e, "Failed to handle update");
            self.orchestrator
                .errors()
                .record(format!("bot: {e}"), None);
        }
    }

    fn is_owner(&self, message: &Message) -> bool {
        message
            .from
            .as_ref()
            .is_some_and(|user| ChatRef(user.id) == self.telegram.owner())
    }

    async fn handle_message(&mut self, message: Message) -> Result<()> {
        let chat = ChatRef(message.chat.id);

        if let Some(document) = &message.document {
            let is_descriptor = document
                .file_name
                .as_deref()
                .is_some_and(|n| n.to_ascii_lowercase().ends_with(".torrent"));
            if !is_descriptor {
                self.telegram
                    .send_text(chat, "Only .torrent files are supported.")
                    .await?;
                return Ok(());
            }
            let dest = self
                .inbox
                .join(format!("{}_{}.torrent", message.chat.id, message.message_id));
            self.telegram.download_file(&document.file_id, &dest).await?;
            tracing::debug!(path = %dest.display(), "Descriptor file received");
            return self.offer_destinations(chat, Descriptor::File(dest)).await;
        }

        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };

        match Command::parse(text) {
            Command::Start | Command::Other => {
                self.telegram.send_text(chat, GREETING).await?;
            }
            Command::Magnet(descriptor) => {
                self.offer_destinations(chat, descriptor).await?;
            }
            Command::Jobs => {
                let reply = if self.is_owner(&message) {
                    format_jobs(&self.orchestrator.jobs().await)
                } else {
                    OWNER_ONLY.to_string()
                };
                self.telegram.send_text(chat, &reply).await?;
            }
            Command::Cancel(id) => {
                let reply = if !self.is_owner(&message) {
                    OWNER_ONLY.to_string()
                } else if let Some(id) = id {
                    match self.orchestrator.cancel(id).await {
                        Ok(CancelOutcome::Requested) => format!("🛑 Stopping job {id}."),
                        Ok(CancelOutcome::DeferredUntilDelivered) => {
                            format!("Job {id} is already delivering and will finish.")
                        }
                        Err(e) => format!("❌ {e}"),
                    }
                } else {
                    "Usage: /cancel <job id>".to_string()
                };
                self.telegram.send_text(chat, &reply).await?;
            }
        }
        Ok(())
    }

    async fn offer_destinations(&mut self, chat: ChatRef, descriptor: Descriptor) -> Result<()> {
        let label = descriptor.label();
        let (pending, evicted) = self.pending.insert(descriptor);
        if let Some(evicted) = evicted {
            discard(&evicted).await;
        }

        let buttons: Vec<(String, String)> = self
            .orchestrator
            .dispatcher()
            .available_destinations()
            .into_iter()
            .map(|destination| {
                let token = DestinationChoice {
                    pending,
                    destination,
                }
                .encode();
                (button_label(destination).to_string(), token)
            })
            .collect();

        self.telegram
            .send_choice(chat, &format!("Where should {label} go?"), &buttons)
            .await?;
        Ok(())
    }

    async fn handle_callback(&mut self, query: CallbackQuery) -> Result<()> {
        let Some(choice) = query.data.as_deref().and_then(DestinationChoice::decode) else {
            tracing::debug!(data = ?query.data, "Rejected malformed callback data");
            return self
                .telegram
                .answer_callback_query(&query.id, Some("Invalid choice."))
                .await;
        };

        let Some(descriptor) = self.pending.take(choice.pending) else {
            return self
                .telegram
                .answer_callback_query(&query.id, Some("This request has expired."))
                .await;
        };

        let prompt = query.message.as_ref().map(Message::reference);
        let chat = prompt
            .map(|m| m.chat)
            .unwrap_or(ChatRef(query.from.id));

        let request = JobRequest {
            descriptor: descriptor.clone(),
            destination: choice.destination,
            chat,
            status_message: prompt,
        };
        match self.orchestrator.start_job(request).await {
            Ok(id) => {
                tracing::info!(job_id = id.0, destination = %choice.destination, "Job requested");
                self.telegram.answer_callback_query(&query.id, None).await
            }
            Err(e) => {
                discard(&descriptor).await;
                let text = format!("❌ {e}");
                match prompt {
                    Some(prompt) => self.telegram.edit_status(prompt, &text).await?,
                    None => {
                        self.telegram.send_text(chat, &text).await?;
                    }
                }
                self.telegram.answer_callback_query(&query.id, None).await
            }
        }
    }
}

/// Remove an uploaded descriptor file that will never become a job
async fn discard(descriptor: &Descriptor) {
    if let Descriptor::File(path) = descriptor
        && let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove descriptor file");
    }
}

fn button_label(destination: Destination) -> &'static str {
    match destination {
        Destination::DirectReturn => "📨 Telegram",
        Destination::RemoteUpload => "☁️ Google Drive",
    }
}

fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::AwaitingMetadata => "fetching metadata",
        JobState::Transferring => "downloading",
        JobState::Delivering => "delivering",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
        JobState::Cancelled => "cancelled",
    }
}

/// `/jobs` reply
pub fn format_jobs(jobs: &[JobSnapshot]) -> String {
    if jobs.is_empty() {
        return "No active jobs.".to_string();
    }
    let mut reply = format!("{} active job(s):", jobs.len());
    for job in jobs {
        let name = job.name.clone().unwrap_or_else(|| job.descriptor.label());
        let progress = job
            .progress
            .map(|p| format!(" {}%", p.percent))
            .unwrap_or_default();
        reply.push_str(&format!(
            "\n#{} {}: {}{} -> {}",
            job.id,
            name,
            state_label(job.state),
            progress,
            job.destination
        ));
        if job.cancel_requested {
            reply.push_str(" (stop requested)");
        }
    }
    reply
}
