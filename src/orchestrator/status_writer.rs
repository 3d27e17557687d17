//! Single owner of requester-facing status I/O
//!
//! Job tasks never call the channel for status text themselves; they post a
//! [`StatusUpdate`] to the [`StatusBoard`] and this task applies it. Posting never
//! waits: each job keeps a short queue of texts, and when the channel falls behind the
//! oldest texts are dropped in favour of newer ones. A slow channel therefore only
//! delays status text, never a job's polling or its reaction to a stop request.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::channel::RequesterChannel;
use crate::types::{ChatRef, JobId, MessageRef};

/// Texts kept per job while the writer is behind
pub(crate) const MAX_QUEUED_PER_JOB: usize = 8;

/// Instruction for the status writer
#[derive(Debug, Clone)]
pub(crate) enum StatusUpdate {
    /// Use an existing message as the job's status message
    Bind { job: JobId, message: MessageRef },
    /// Show `text` as the job's status, posting a new message if none is bound
    Render {
        job: JobId,
        chat: ChatRef,
        text: String,
    },
    /// Show the final `text` and forget the job's status message
    Finish {
        job: JobId,
        chat: ChatRef,
        text: String,
    },
}

struct Slot {
    chat: ChatRef,
    bind: Option<MessageRef>,
    texts: VecDeque<String>,
    finish: bool,
}

#[derive(Default)]
struct Queue {
    /// Jobs with pending work, served round-robin
    order: VecDeque<JobId>,
    slots: HashMap<JobId, Slot>,
}

/// One unit of writer work
struct Step {
    job: JobId,
    chat: ChatRef,
    bind: Option<MessageRef>,
    text: Option<String>,
    finish: bool,
}

/// Pending status work shared between job tasks and the writer
#[derive(Default)]
pub(crate) struct StatusBoard {
    queue: Mutex<Queue>,
    notify: Notify,
}

impl StatusBoard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an update without waiting
    pub(crate) fn post(&self, update: StatusUpdate) {
        {
            let mut guard = self.lock();
            let queue = &mut *guard;
            let (job, chat) = match &update {
                StatusUpdate::Bind { job, message } => (*job, message.chat),
                StatusUpdate::Render { job, chat, .. } | StatusUpdate::Finish { job, chat, .. } => {
                    (*job, *chat)
                }
            };
            let slot = match queue.slots.entry(job) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    queue.order.push_back(job);
                    entry.insert(Slot {
                        chat,
                        bind: None,
                        texts: VecDeque::new(),
                        finish: false,
                    })
                }
            };

            match update {
                StatusUpdate::Bind { message, .. } => slot.bind = Some(message),
                StatusUpdate::Render { text, .. } => slot.texts.push_back(text),
                StatusUpdate::Finish { text, .. } => {
                    slot.texts.push_back(text);
                    slot.finish = true;
                }
            }
            if slot.texts.len() > MAX_QUEUED_PER_JOB {
                slot.texts.pop_front();
                tracing::debug!(job_id = job.0, "Status writer behind, dropped a stale status");
            }
        }
        self.notify.notify_one();
    }

    /// Next piece of work: at most one text from the job at the front
    fn next(&self) -> Option<Step> {
        let mut guard = self.lock();
        let queue = &mut *guard;
        loop {
            let job = queue.order.pop_front()?;
            let Some(slot) = queue.slots.get_mut(&job) else {
                continue;
            };
            let bind = slot.bind.take();
            let text = slot.texts.pop_front();
            let drained = slot.texts.is_empty();
            let step = Step {
                job,
                chat: slot.chat,
                bind,
                text,
                finish: drained && slot.finish,
            };
            if drained {
                queue.slots.remove(&job);
            } else {
                queue.order.push_back(job);
            }
            return Some(step);
        }
    }

    /// Jobs with status work not yet applied
    #[cfg(test)]
    pub(crate) fn pending_jobs(&self) -> usize {
        self.lock().slots.len()
    }
}

/// Spawn the writer loop
///
/// Runs until `cancel` fires; work already on the board at that point is still applied.
pub(crate) fn spawn_status_writer(
    channel: Arc<dyn RequesterChannel>,
    board: Arc<StatusBoard>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut bound: HashMap<JobId, MessageRef> = HashMap::new();

        loop {
            while let Some(step) = board.next() {
                apply(channel.as_ref(), &mut bound, step).await;
            }
            tokio::select! {
                _ = board.notify.notified() => {}
                _ = cancel.cancelled() => {
                    while let Some(step) = board.next() {
                        apply(channel.as_ref(), &mut bound, step).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!("Status writer stopped");
    })
}

async fn apply(channel: &dyn RequesterChannel, bound: &mut HashMap<JobId, MessageRef>, step: Step) {
    if let Some(message) = step.bind {
        bound.insert(step.job, message);
    }
    if let Some(text) = &step.text {
        show(channel, bound, step.job, step.chat, text).await;
    }
    if step.finish {
        bound.remove(&step.job);
    }
}

async fn show(
    channel: &dyn RequesterChannel,
    bound: &mut HashMap<JobId, MessageRef>,
    job: JobId,
    chat: ChatRef,
    text: &str,
) {
    match bound.get(&job) {
        Some(message) => {
            if let Err(e) = channel.edit_status(*message, text).await {
                tracing::warn!(job_id = job.0, error = %e, "Failed to update status message");
            }
        }
        None => match channel.send_status(chat, text).await {
            Ok(message) => {
                bound.insert(job, message);
            }
            Err(e) => {
                tracing::warn!(job_id = job.0, error = %e, "Failed to post status message");
            }
        },
    }
}
