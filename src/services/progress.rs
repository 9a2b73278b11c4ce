//! Throttled transfer progress reporting
//!
//! Transports report progress far more often than a status message should be
//! edited. The reporter samples every callback but only emits when the transfer
//! completes or when the sampling interval has passed since the last emission for
//! that phase. Emission is fire-and-forget: a slow or failing sink never holds up
//! the transfer, and sink errors are logged and dropped.
//!
//! Closing a reporter drops every later update and waits for an in-flight one,
//! so nothing it emits can overwrite the text written after it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::services::collaborators::{MessagingClient, ProgressCallback, StatusHandle};
use crate::services::file_utils::{format_bytes, format_clock};

/// Default minimum time between two emissions of the same phase
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

const BAR_WIDTH: usize = 25;

/// Which transfer is being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    Download,
    Upload,
}

impl TransferPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Download => "download",
            TransferPhase::Upload => "upload",
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            TransferPhase::Download => "Download Started...",
            TransferPhase::Upload => "Upload Started...",
        }
    }
}

/// Where rendered progress text goes
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, text: String) -> Result<()>;
}

/// Progress sink that edits a status message
pub struct StatusMessageSink {
    client: Arc<dyn MessagingClient>,
    handle: StatusHandle,
}

impl StatusMessageSink {
    pub fn new(client: Arc<dyn MessagingClient>, handle: StatusHandle) -> Self {
        Self { client, handle }
    }
}

#[async_trait]
impl ProgressSink for StatusMessageSink {
    async fn emit(&self, text: String) -> Result<()> {
        self.client.edit(&self.handle, &text).await
    }
}

/// One emitted progress sample
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    /// Bytes per second since the phase started
    pub speed: f64,
    pub eta_secs: u64,
}

impl ProgressSnapshot {
    fn compute(current: u64, total: u64, elapsed: Duration) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            current as f64 * 100.0 / total as f64
        };
        let elapsed_secs = elapsed.as_secs_f64();
        let speed = if elapsed_secs > 0.0 {
            current as f64 / elapsed_secs
        } else {
            0.0
        };
        let eta_secs = if speed > 0.0 {
            (total.saturating_sub(current) as f64 / speed).round() as u64
        } else {
            0
        };

        Self {
            current,
            total,
            percentage,
            speed,
            eta_secs,
        }
    }

    /// Fixed-width bar, `BAR_WIDTH` cells
    pub fn bar(&self) -> String {
        let filled = if self.total == 0 {
            BAR_WIDTH
        } else {
            ((BAR_WIDTH as u128 * self.current as u128) / self.total as u128).min(BAR_WIDTH as u128)
                as usize
        };
        format!("{}{}", "■".repeat(filled), "□".repeat(BAR_WIDTH - filled))
    }

    pub fn render(&self, phase: TransferPhase) -> String {
        format!(
            "{}\n\n[{}] {:.2}%\nSize: {} of {}\nSpeed: {}/s\nETA: {}",
            phase.heading(),
            self.bar(),
            self.percentage,
            format_bytes(self.current),
            format_bytes(self.total),
            format_bytes(self.speed as u64),
            format_clock(self.eta_secs),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct PhaseClock {
    started: Instant,
    last_emit: Instant,
}

impl PhaseClock {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            last_emit: now,
        }
    }
}

/// Per-operation throttled progress reporter
pub struct ProgressReporter {
    interval: Duration,
    clocks: Mutex<HashMap<TransferPhase, PhaseClock>>,
    closed: Arc<AtomicBool>,
    /// Held by the task currently emitting
    emitting: Arc<tokio::sync::Mutex<()>>,
}

impl ProgressReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            clocks: Mutex::new(HashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
            emitting: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Reset the clock for a phase; speed and throttling are measured from here
    pub fn start_phase(&self, phase: TransferPhase) {
        self.clocks.lock().insert(phase, PhaseClock::new(Instant::now()));
    }

    /// Sample a progress callback. Returns a snapshot only when one should be emitted.
    pub fn sample(&self, current: u64, total: u64, phase: TransferPhase) -> Option<ProgressSnapshot> {
        self.sample_at(current, total, phase, Instant::now())
    }

    fn sample_at(
        &self,
        current: u64,
        total: u64,
        phase: TransferPhase,
        now: Instant,
    ) -> Option<ProgressSnapshot> {
        let mut clocks = self.clocks.lock();
        let clock = clocks.entry(phase).or_insert_with(|| PhaseClock::new(now));

        let complete = current >= total;
        if !complete && now.saturating_duration_since(clock.last_emit) < self.interval {
            return None;
        }

        clock.last_emit = now;
        Some(ProgressSnapshot::compute(
            current,
            total,
            now.saturating_duration_since(clock.started),
        ))
    }

    /// Sample and, when due, hand the rendered text to the sink without waiting
    pub fn report(&self, current: u64, total: u64, phase: TransferPhase, sink: &Arc<dyn ProgressSink>) {
        if self.is_closed() {
            return;
        }
        let Some(snapshot) = self.sample(current, total, phase) else {
            return;
        };
        let text = snapshot.render(phase);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(phase = phase.as_str(), "No runtime available, dropping progress update");
            return;
        };
        let sink = Arc::clone(sink);
        let closed = Arc::clone(&self.closed);
        let emitting = Arc::clone(&self.emitting);
        runtime.spawn(async move {
            let _emitting = emitting.lock().await;
            if closed.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = sink.emit(text).await {
                debug!(phase = phase.as_str(), error = %e, "Progress update failed");
            }
        });
    }

    /// Stop emitting. Returns once no update is being delivered.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _emitting = self.emitting.lock().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Build a transport progress callback bound to one phase and sink
    pub fn callback(self: &Arc<Self>, phase: TransferPhase, sink: Arc<dyn ProgressSink>) -> ProgressCallback {
        let reporter = Arc::clone(self);
        Arc::new(move |current, total| reporter.report(current, total, phase, &sink))
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl ProgressSink for ChannelSink {
        async fn emit(&self, text: String) -> Result<()> {
            let _ = self.0.send(text);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ProgressSink for FailingSink {
        async fn emit(&self, _text: String) -> Result<()> {
            anyhow::bail!("sink unreachable")
        }
    }

    #[test]
    fn test_throttles_within_interval() {
        let reporter = ProgressReporter::new(Duration::from_secs(10));
        let start = Instant::now();
        reporter.clocks.lock().insert(TransferPhase::Download, PhaseClock::new(start));

        assert!(reporter.sample_at(10, 100, TransferPhase::Download, start + Duration::from_secs(1)).is_none());
        assert!(reporter.sample_at(50, 100, TransferPhase::Download, start + Duration::from_secs(9)).is_none());

        let snapshot = reporter
            .sample_at(50, 100, TransferPhase::Download, start + Duration::from_secs(10))
            .expect("due after interval");
        assert_eq!(snapshot.percentage, 50.0);
        assert_eq!(snapshot.speed, 5.0);
        assert_eq!(snapshot.eta_secs, 10);

        // interval restarts from the last emission
        assert!(reporter.sample_at(60, 100, TransferPhase::Download, start + Duration::from_secs(15)).is_none());
    }

    #[test]
    fn test_completion_always_emits() {
        let reporter = ProgressReporter::new(Duration::from_secs(10));
        let start = Instant::now();
        reporter.clocks.lock().insert(TransferPhase::Upload, PhaseClock::new(start));

        let snapshot = reporter
            .sample_at(100, 100, TransferPhase::Upload, start)
            .expect("completion emits");
        assert_eq!(snapshot.percentage, 100.0);
        assert_eq!(snapshot.eta_secs, 0);
        assert_eq!(snapshot.speed, 0.0);
    }

    #[test]
    fn test_phases_are_throttled_separately() {
        let reporter = ProgressReporter::new(Duration::from_secs(10));
        let start = Instant::now();
        {
            let mut clocks = reporter.clocks.lock();
            clocks.insert(TransferPhase::Download, PhaseClock::new(start));
            clocks.insert(TransferPhase::Upload, PhaseClock::new(start + Duration::from_secs(8)));
        }
        let at = start + Duration::from_secs(12);
        assert!(reporter.sample_at(1, 2, TransferPhase::Download, at).is_some());
        assert!(reporter.sample_at(1, 2, TransferPhase::Upload, at).is_none());
    }

    #[test]
    fn test_render_bar() {
        let snapshot = ProgressSnapshot::compute(40, 100, Duration::from_secs(4));
        assert_eq!(snapshot.bar().chars().count(), BAR_WIDTH);
        assert_eq!(snapshot.bar().chars().filter(|c| *c == '■').count(), 10);

        let text = snapshot.render(TransferPhase::Download);
        assert!(text.starts_with("Download Started..."));
        assert!(text.contains("40.00%"));
        assert!(text.contains("Size: 40 B of 100 B"));
        assert!(text.contains("ETA: 0:00:06"));
    }

    #[test]
    fn test_zero_total() {
        let snapshot = ProgressSnapshot::compute(0, 0, Duration::from_secs(1));
        assert_eq!(snapshot.percentage, 100.0);
        assert_eq!(snapshot.bar(), "■".repeat(BAR_WIDTH));
    }

    #[tokio::test]
    async fn test_report_emits_to_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink(tx));
        let reporter = Arc::new(ProgressReporter::new(Duration::from_secs(3600)));
        reporter.start_phase(TransferPhase::Upload);

        let callback = reporter.callback(TransferPhase::Upload, sink);
        callback(10, 100);
        callback(100, 100);

        let text = rx.recv().await.expect("completion update");
        assert!(text.contains("100.00%"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_reporter_emits_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink(tx));
        let reporter = Arc::new(ProgressReporter::new(Duration::from_secs(3600)));
        let callback = reporter.callback(TransferPhase::Upload, sink);

        // queued before close, delivered after: must be dropped
        callback(100, 100);
        reporter.close().await;
        tokio::task::yield_now().await;
        callback(100, 100);
        tokio::task::yield_now().await;

        assert!(reporter.is_closed());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let sink: Arc<dyn ProgressSink> = Arc::new(FailingSink);
        let reporter = ProgressReporter::new(Duration::from_secs(10));
        reporter.report(5, 5, TransferPhase::Download, &sink);
        tokio::task::yield_now().await;
    }
}
