//! Error aggregator and the periodic owner notifier
//!
//! Failures that the requester can't act on (delivery errors, mostly) are buffered here
//! and reported to the owner in one message per interval, so a burst of failures does
//! not turn into a burst of notifications.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::channel::RequesterChannel;
use crate::types::{ErrorRecord, JobId};

struct Buffer {
    records: VecDeque<ErrorRecord>,
    dropped: u64,
}

/// Bounded buffer of error records
///
/// Writers never block each other for longer than a push; when the buffer is full the
/// oldest record is discarded.
pub struct ErrorAggregator {
    buffer: Mutex<Buffer>,
    capacity: usize,
}

impl ErrorAggregator {
    /// Create an aggregator holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(Buffer {
                records: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            capacity,
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record
    pub fn record(&self, message: impl Into<String>, job_id: Option<JobId>) {
        let record = ErrorRecord {
            job_id,
            message: message.into(),
            timestamp: Utc::now(),
        };
        let mut buffer = self.buffer();
        if buffer.records.len() >= self.capacity {
            buffer.records.pop_front();
            buffer.dropped += 1;
            tracing::warn!(
                capacity = self.capacity,
                dropped_total = buffer.dropped,
                "Error buffer full, discarding oldest record"
            );
        }
        buffer.records.push_back(record);
    }

    /// Take every buffered record, leaving the buffer empty
    ///
    /// The swap happens under the lock, so a concurrent `record` lands either in this
    /// drain or the next one, never in neither.
    pub fn drain_all(&self) -> Vec<ErrorRecord> {
        let mut buffer = self.buffer();
        std::mem::take(&mut buffer.records).into()
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.buffer().records.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records discarded because the buffer was full, since creation
    pub fn dropped_total(&self) -> u64 {
        self.buffer().dropped
    }
}

/// Render drained records as one owner message
pub fn format_error_report(records: &[ErrorRecord]) -> String {
    let mut report = format!("⚠️ {} error(s) since the last report:", records.len());
    for record in records {
        report.push('\n');
        match record.job_id {
            Some(id) => report.push_str(&format!(
                "[{}] job {}: {}",
                record.timestamp.format("%H:%M:%S"),
                id,
                record.message
            )),
            None => report.push_str(&format!(
                "[{}] {}",
                record.timestamp.format("%H:%M:%S"),
                record.message
            )),
        }
    }
    report
}

/// Drain the aggregator once and notify the owner if anything was buffered
///
/// Returns the number of records reported.
pub async fn flush_errors(aggregator: &ErrorAggregator, channel: &dyn RequesterChannel) -> usize {
    let records = aggregator.drain_all();
    if records.is_empty() {
        return 0;
    }
    let count = records.len();
    if let Err(e) = channel.notify_owner(&format_error_report(&records)).await {
        tracing::error!(error = %e, lost = count, "Failed to send error report to owner");
    }
    count
}

/// Spawn the periodic notifier
///
/// Every `interval` the aggregator is drained and a single combined report is sent when
/// the buffer was non-empty. On cancellation a last flush runs before the task exits.
pub fn spawn_error_notifier(
    aggregator: Arc<ErrorAggregator>,
    channel: Arc<dyn RequesterChannel>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // first tick one full interval from now
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reported = flush_errors(&aggregator, channel.as_ref()).await;
                    if reported > 0 {
                        tracing::info!(reported, "Sent error report to owner");
                    }
                }
                _ = cancel.cancelled() => {
                    flush_errors(&aggregator, channel.as_ref()).await;
                    tracing::debug!("Error notifier stopped");
                    break;
                }
            }
        }
    })
}
