//! Progress monitor and status rendering

use futures::Stream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

use crate::engine::{EngineSession, TransferHandle};
use crate::error::Result;
use crate::types::ProgressSnapshot;

/// Width of the progress bar in blocks
const BAR_WIDTH: u8 = 10;

/// One poll of a transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressTick {
    /// Latest snapshot
    pub snapshot: ProgressSnapshot,
    /// Whether the transfer reported complete on this poll
    pub complete: bool,
}

/// Polls one transfer at a fixed cadence
///
/// Each monitor only touches its own handle, and status reads are not serialized by
/// the engine session, so one slow transfer never stalls another job's monitor.
pub struct ProgressMonitor {
    session: Arc<EngineSession>,
    handle: Arc<dyn TransferHandle>,
    cadence: Duration,
}

impl ProgressMonitor {
    /// Monitor `handle`, polling every `cadence`
    pub fn new(
        session: Arc<EngineSession>,
        handle: Arc<dyn TransferHandle>,
        cadence: Duration,
    ) -> Self {
        Self {
            session,
            handle,
            cadence,
        }
    }

    /// Lazy sequence of progress ticks
    ///
    /// Every call starts a fresh sequence with its own timer. The first poll happens
    /// immediately. The sequence ends after the tick that reports completion, or after
    /// the first error (which is yielded).
    pub fn snapshots(&self) -> impl Stream<Item = Result<ProgressTick>> + Send + 'static {
        let mut interval = tokio::time::interval(self.cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let ticks = IntervalStream::new(interval);

        futures::stream::unfold(
            (ticks, self.session.clone(), self.handle.clone(), false),
            |(mut ticks, session, handle, finished)| async move {
                if finished {
                    return None;
                }
                ticks.next().await?;
                let result = poll_once(&session, handle.as_ref()).await;
                let finished = match &result {
                    Ok(tick) => tick.complete,
                    Err(_) => true,
                };
                Some((result, (ticks, session, handle, finished)))
            },
        )
    }
}

async fn poll_once(session: &EngineSession, handle: &dyn TransferHandle) -> Result<ProgressTick> {
    let status = session.status(handle).await?;
    let complete = session.is_complete(handle).await?;
    let fraction = if complete { 1.0 } else { status.fraction_done };
    Ok(ProgressTick {
        snapshot: ProgressSnapshot::from_fraction(fraction, status.download_rate),
        complete,
    })
}

/// Status line for a transferring job, built from the latest snapshot only
pub fn render_status(name: &str, snapshot: &ProgressSnapshot) -> String {
    let filled = (snapshot.percent / BAR_WIDTH).min(BAR_WIDTH) as usize;
    let bar = format!(
        "{}{}",
        "█".repeat(filled),
        "-".repeat(BAR_WIDTH as usize - filled)
    );
    format!(
        "📥 {} [{}] {}% ({} KB/s)",
        name,
        bar,
        snapshot.percent,
        snapshot.rate_per_second / 1000
    )
}

/// Suppresses consecutive identical status renderings
#[derive(Debug, Default)]
pub struct StatusRenderer {
    last: Option<String>,
}

impl StatusRenderer {
    /// Create a renderer with nothing shown yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to show for `snapshot`, or `None` when it matches what is already shown
    pub fn render(&mut self, name: &str, snapshot: &ProgressSnapshot) -> Option<String> {
        let text = render_status(name, snapshot);
        if self.last.as_deref() == Some(text.as_str()) {
            return None;
        }
        self.last = Some(text.clone());
        Some(text)
    }
}
