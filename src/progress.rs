//! Progress/status sink: event fan-out, current-progress snapshot and throttling.
//!
//! Events go out on a broadcast channel so any number of observers (console,
//! GUI, log) can subscribe. The latest aggregate progress lives in a watch
//! channel whose only writer is the batch task.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

use crate::types::{BatchOutcome, BatchStatus, Event, JobId, JobStatus, Phase, ProgressEvent};
use crate::utils::{format_bytes, format_duration};

/// Buffer size of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Latest aggregate progress of a batch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Controller state
    pub status: BatchStatus,
    /// Job currently running
    pub current_job: Option<JobId>,
    /// 1-based index of the current job
    pub index: usize,
    /// Jobs in the batch
    pub total: usize,
    /// Jobs finished (succeeded or failed)
    pub completed: usize,
    /// Byte progress of the current job, when known
    pub percent: Option<f32>,
    /// Last status line
    pub message: String,
}

/// Sender side of the event and progress channels
#[derive(Clone)]
pub struct EventSink {
    event_tx: broadcast::Sender<Event>,
    progress_tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    /// Create a sink with the default channel capacity
    pub fn new() -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (progress_tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            event_tx,
            progress_tx: Arc::new(progress_tx),
        }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Watch the aggregate progress snapshot
    pub fn watch_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    /// Current snapshot
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress_tx.borrow().clone()
    }

    /// Emit an event and fold it into the progress snapshot
    ///
    /// Having no subscribers is not an error.
    pub fn emit(&self, event: Event) {
        self.progress_tx.send_modify(|snapshot| apply_event(snapshot, &event));
        tracing::trace!(?event, "Event emitted");
        self.event_tx.send(event).ok();
    }

    /// Emit a job progress record
    pub fn progress_event(&self, event: ProgressEvent) {
        self.emit(Event::Progress(event));
    }
}

fn apply_event(snapshot: &mut ProgressSnapshot, event: &Event) {
    match event {
        Event::BatchStarted { total } => {
            *snapshot = ProgressSnapshot {
                status: BatchStatus::Running,
                total: *total,
                message: format!("Starting {} job(s)", total),
                ..ProgressSnapshot::default()
            };
        }
        Event::JobStarted { id, index, total, .. } => {
            snapshot.current_job = Some(*id);
            snapshot.index = *index;
            snapshot.total = *total;
            snapshot.percent = Some(0.0);
        }
        Event::Progress(progress) if snapshot.current_job == Some(progress.job_id) => {
            match progress.phase {
                Phase::Downloading => snapshot.percent = progress.percent(),
                Phase::Transcoding | Phase::Done => snapshot.percent = Some(100.0),
                Phase::Error => snapshot.percent = None,
            }
        }
        Event::JobFinished { status, .. } => {
            if matches!(status, JobStatus::Succeeded | JobStatus::Failed) {
                snapshot.completed += 1;
            }
            snapshot.current_job = None;
        }
        Event::BatchFinished { outcome } => {
            snapshot.status = match outcome {
                BatchOutcome::Cancelled { .. } => BatchStatus::Cancelled,
                _ => BatchStatus::Completed,
            };
            snapshot.current_job = None;
            snapshot.percent = None;
        }
        _ => {}
    }
    if let Some(line) = status_line(event) {
        snapshot.message = line;
    }
}

/// Human-readable status line for an event
///
/// Returns `None` for progress events with neither byte counts nor a message.
pub fn status_line(event: &Event) -> Option<String> {
    let line = match event {
        Event::BatchStarted { total } => format!("Starting {} job(s)", total),
        Event::JobStarted { index, total, url, .. } => {
            format!("Downloading {} of {}: {}", index, total, url)
        }
        Event::Progress(progress) => match progress.phase {
            Phase::Downloading if progress.bytes_done > 0 || progress.bytes_total.is_some() => {
                let mut line = match (progress.percent(), progress.bytes_total) {
                    (Some(percent), Some(total)) => format!(
                        "Downloading: {:.1}% of {}",
                        percent,
                        format_bytes(total)
                    ),
                    _ => format!("Downloading: {}", format_bytes(progress.bytes_done)),
                };
                if let Some(speed) = progress.speed_bps {
                    line.push_str(&format!(" ({}/s)", format_bytes(speed)));
                }
                if let Some(eta) = progress.eta_secs {
                    line.push_str(&format!(" ETA {}", format_duration(Duration::from_secs(eta))));
                }
                line
            }
            _ if progress.message.is_empty() => return None,
            _ => progress.message.clone(),
        },
        Event::Retrying {
            attempt,
            max_attempts,
            error,
            ..
        } => format!("Retry {}/{} after error: {}", attempt, max_attempts, error),
        Event::CredentialFallback { error, .. } => {
            format!("Continuing without credentials: {}", error)
        }
        Event::JobFinished {
            index,
            total,
            status,
            output,
            error,
            ..
        } => match (status, output, error) {
            (JobStatus::Succeeded, Some(path), _) => {
                format!("[{}/{}] Saved {}", index, total, path.display())
            }
            (JobStatus::Failed, _, Some(error)) => {
                format!("[{}/{}] Failed: {}", index, total, error)
            }
            _ => format!("[{}/{}] {}", index, total, status),
        },
        Event::CancelRequested => {
            "Cancellation requested, waiting for the current download to finish".to_string()
        }
        Event::BatchFinished { outcome } => match outcome {
            BatchOutcome::AllSucceeded { succeeded } => {
                format!("All {} download(s) completed successfully", succeeded)
            }
            BatchOutcome::SomeFailed { succeeded, failed } => format!(
                "{} download(s) failed, {} succeeded",
                failed, succeeded
            ),
            BatchOutcome::Cancelled {
                completed,
                cancelled,
            } => format!(
                "Cancelled: {} completed, {} not started",
                completed, cancelled
            ),
        },
    };
    Some(line)
}

/// Rate limiter for byte-progress events
///
/// Phase transitions bypass the throttle; only `Downloading` byte updates go
/// through [`ProgressThrottle::should_emit`].
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    started: Instant,
    baseline: u64,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    /// Create a throttle allowing one event per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started: Instant::now(),
            baseline: 0,
            last_emit: None,
        }
    }

    /// Measure speed from `now` on, counting only bytes beyond `bytes_done`
    ///
    /// Called at the start of every transfer attempt so resumed bytes are not
    /// mistaken for throughput.
    pub fn restart(&mut self, bytes_done: u64, now: Instant) {
        self.started = now;
        self.baseline = bytes_done;
    }

    /// Whether an update at `now` may be emitted; records the emission if so
    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Build a byte-progress event with speed and ETA for the current attempt
    pub fn downloading(
        &self,
        job_id: JobId,
        bytes_done: u64,
        bytes_total: Option<u64>,
        now: Instant,
    ) -> ProgressEvent {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let speed_bps = if elapsed > 0.0 {
            Some((bytes_done.saturating_sub(self.baseline) as f64 / elapsed) as u64)
        } else {
            None
        };
        let eta_secs = match (bytes_total, speed_bps) {
            (Some(total), Some(speed)) if speed > 0 && total >= bytes_done => {
                Some((total - bytes_done) / speed)
            }
            _ => None,
        };
        ProgressEvent {
            job_id,
            phase: Phase::Downloading,
            bytes_done,
            bytes_total,
            speed_bps,
            eta_secs,
            message: String::new(),
        }
    }
}
