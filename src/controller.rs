//! Batch controller: drains a job queue sequentially on one background task
//!
//! State machine: Idle -> Running -> {Completed, Cancelled}. Cancellation is
//! cooperative and only observed between jobs (and during the pacing delay);
//! the job in flight always runs to completion.

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BatchError, Result};
use crate::progress::{EventSink, ProgressSnapshot};
use crate::queue::JobQueue;
use crate::types::{BatchOutcome, BatchReport, BatchStatus, DownloadJob, Event, JobOutcome, JobStatus};
use crate::worker::FetchWorker;

/// Runs exactly one batch of jobs
pub struct BatchController {
    worker: FetchWorker,
    events: EventSink,
    state_tx: Arc<watch::Sender<BatchStatus>>,
    cancel_token: CancellationToken,
}

impl BatchController {
    /// Create an idle controller
    pub fn new(worker: FetchWorker) -> Self {
        Self::with_events(worker, EventSink::new())
    }

    /// Create an idle controller emitting into an existing sink
    pub fn with_events(worker: FetchWorker, events: EventSink) -> Self {
        let (state_tx, _rx) = watch::channel(BatchStatus::Idle);
        Self {
            worker,
            events,
            state_tx: Arc::new(state_tx),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Subscribe to batch events
    ///
    /// Subscribe before [`start`](Self::start) to see every event of the batch.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The event sink this controller emits into
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Current controller state
    pub fn state(&self) -> BatchStatus {
        *self.state_tx.borrow()
    }

    /// Request cooperative cancellation
    ///
    /// Safe to call from any task, before or during the batch, any number of
    /// times. The job in flight finishes; jobs not yet started are cancelled.
    pub fn cancel(&self) {
        request_cancel(&self.cancel_token, &self.events);
    }

    /// Token observed by the batch task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Start draining `queue` on a background task
    ///
    /// Fails with [`BatchError::AlreadyStarted`] unless the controller is idle.
    pub fn start(&self, queue: JobQueue) -> Result<BatchHandle> {
        let started = self.state_tx.send_if_modified(|state| {
            if *state == BatchStatus::Idle {
                *state = BatchStatus::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(BatchError::AlreadyStarted.into());
        }

        let runner = BatchRunner {
            worker: self.worker.clone(),
            events: self.events.clone(),
            state_tx: Arc::clone(&self.state_tx),
            cancel_token: self.cancel_token.clone(),
        };
        let task = tokio::spawn(runner.run(queue));

        Ok(BatchHandle {
            task,
            events: self.events.clone(),
            state_rx: self.state_tx.subscribe(),
            cancel_token: self.cancel_token.clone(),
        })
    }
}

fn request_cancel(token: &CancellationToken, events: &EventSink) {
    if token.is_cancelled() {
        return;
    }
    token.cancel();
    tracing::info!("Cancellation requested");
    events.emit(Event::CancelRequested);
}

/// Handle to a running batch
pub struct BatchHandle {
    task: JoinHandle<Result<BatchReport>>,
    events: EventSink,
    state_rx: watch::Receiver<BatchStatus>,
    cancel_token: CancellationToken,
}

impl BatchHandle {
    /// Request cooperative cancellation
    pub fn cancel(&self) {
        request_cancel(&self.cancel_token, &self.events);
    }

    /// Subscribe to batch events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Current aggregate progress
    pub fn progress(&self) -> ProgressSnapshot {
        self.events.progress()
    }

    /// Watch aggregate progress
    pub fn watch_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.events.watch_progress()
    }

    /// Current controller state
    pub fn state(&self) -> BatchStatus {
        *self.state_rx.borrow()
    }

    /// Whether the batch task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the batch to end and return its report
    pub async fn wait(self) -> Result<BatchReport> {
        self.task
            .await
            .map_err(|e| BatchError::TaskFailed(e.to_string()))?
    }
}

struct BatchRunner {
    worker: FetchWorker,
    events: EventSink,
    state_tx: Arc<watch::Sender<BatchStatus>>,
    cancel_token: CancellationToken,
}

impl BatchRunner {
    async fn run(self, mut queue: JobQueue) -> Result<BatchReport> {
        let started_at = Utc::now();
        let total = queue.len();
        let mut rng = StdRng::from_entropy();
        let mut jobs: Vec<DownloadJob> = Vec::with_capacity(total);
        let (mut succeeded, mut failed, mut cancelled) = (0usize, 0usize, 0usize);

        tracing::info!(total, "Batch started");
        self.events.emit(Event::BatchStarted { total });

        let mut index = 0;
        while let Some(mut job) = queue.dequeue_next() {
            index += 1;

            if index > 1 && !self.cancel_token.is_cancelled() {
                let delay = self.worker.config().pacing.next_delay(&mut rng);
                if !delay.is_zero() {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Pausing before next job");
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            if self.cancel_token.is_cancelled() {
                job.transition(JobStatus::Cancelled)?;
                cancelled += 1;
                self.finish_job(&job, index, total);
                jobs.push(job);
                continue;
            }

            job.transition(JobStatus::Running)?;
            tracing::info!(job_id = %job.id, index, total, url = %job.url, "Starting job");
            self.events.emit(Event::JobStarted {
                id: job.id,
                index,
                total,
                url: job.url.to_string(),
            });

            match self.worker.run(&job, &self.events).await {
                JobOutcome::Succeeded { path } => {
                    job.transition(JobStatus::Succeeded)?;
                    job.output = Some(path);
                    succeeded += 1;
                }
                JobOutcome::Failed { reason, .. } => {
                    job.transition(JobStatus::Failed)?;
                    job.error = Some(reason);
                    failed += 1;
                }
            }
            self.finish_job(&job, index, total);
            jobs.push(job);
        }

        let (outcome, status) = if cancelled > 0 {
            (
                BatchOutcome::Cancelled {
                    completed: succeeded + failed,
                    cancelled,
                },
                BatchStatus::Cancelled,
            )
        } else if failed > 0 {
            (BatchOutcome::SomeFailed { succeeded, failed }, BatchStatus::Completed)
        } else {
            (BatchOutcome::AllSucceeded { succeeded }, BatchStatus::Completed)
        };

        tracing::info!(succeeded, failed, cancelled, "Batch finished");
        self.state_tx.send_replace(status);
        self.events.emit(Event::BatchFinished {
            outcome: outcome.clone(),
        });

        Ok(BatchReport {
            outcome,
            jobs,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn finish_job(&self, job: &DownloadJob, index: usize, total: usize) {
        self.events.emit(Event::JobFinished {
            id: job.id,
            index,
            total,
            status: job.status,
            output: job.output.clone(),
            error: job.error.clone(),
        });
    }
}
