//! Core types for mp3-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::error::{BatchError, Result};

/// Unique identifier for a job within a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status
///
/// Transitions only move forward: Pending -> Running -> {Succeeded, Failed, Cancelled},
/// or Pending -> Cancelled for jobs a cancelled batch never started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue
    Pending,
    /// Picked up by the worker
    Running,
    /// Audio file written
    Succeeded,
    /// Failed with an error
    Failed,
    /// Never started because the batch was cancelled
    Cancelled,
}

impl JobStatus {
    /// Whether the status is final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Target audio format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// MPEG-1 Layer III (default)
    #[default]
    Mp3,
    /// AAC in an MP4 container
    M4a,
    /// Opus in an Ogg container
    Opus,
    /// Lossless FLAC
    Flac,
    /// Uncompressed PCM
    Wav,
}

impl OutputFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
            OutputFormat::Opus => "opus",
            OutputFormat::Flac => "flac",
            OutputFormat::Wav => "wav",
        }
    }

    /// ffmpeg audio codec name
    pub fn codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "libmp3lame",
            OutputFormat::M4a => "aac",
            OutputFormat::Opus => "libopus",
            OutputFormat::Flac => "flac",
            OutputFormat::Wav => "pcm_s16le",
        }
    }

    /// Whether the bitrate setting applies
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            OutputFormat::Mp3 | OutputFormat::M4a | OutputFormat::Opus
        )
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "m4a" | "aac" => Ok(OutputFormat::M4a),
            "opus" => Ok(OutputFormat::Opus),
            "flac" => Ok(OutputFormat::Flac),
            "wav" => Ok(OutputFormat::Wav),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unsupported output format '{}'",
                other
            ))),
        }
    }
}

/// One URL-to-audio-file conversion request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Job ID
    pub id: JobId,
    /// Source URL
    pub url: Url,
    /// Destination directory for the audio file
    pub dest_dir: PathBuf,
    /// Desired output format
    pub format: OutputFormat,
    /// Current status
    pub status: JobStatus,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
    /// Final audio file (set on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Failure reason (set on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadJob {
    /// Create a pending job
    pub fn new(id: JobId, url: Url, dest_dir: PathBuf, format: OutputFormat) -> Self {
        Self {
            id,
            url,
            dest_dir,
            format,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            output: None,
            error: None,
        }
    }

    /// Move the job to `next`, rejecting backward transitions
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BatchError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            }
            .into());
        }
        self.status = next;
        Ok(())
    }
}

/// Phase of a job as reported by the fetch worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Fetching media bytes
    Downloading,
    /// Running the encoder
    Transcoding,
    /// Audio file written
    Done,
    /// Job failed
    Error,
}

impl Phase {
    /// Whether this phase ends the job
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

/// Structured progress record for one job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job ID
    pub job_id: JobId,
    /// Current phase
    pub phase: Phase,
    /// Bytes fetched so far
    pub bytes_done: u64,
    /// Total size when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    /// Average speed in bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// Human-readable status
    pub message: String,
}

impl ProgressEvent {
    /// Create an event with no byte counters
    pub fn phase(job_id: JobId, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            job_id,
            phase,
            bytes_done: 0,
            bytes_total: None,
            speed_bps: None,
            eta_secs: None,
            message: message.into(),
        }
    }

    /// Completion percentage when the total is known
    pub fn percent(&self) -> Option<f32> {
        match self.bytes_total {
            Some(total) if total > 0 => {
                Some((self.bytes_done as f32 / total as f32 * 100.0).min(100.0))
            }
            _ => None,
        }
    }
}

/// Final result of one job, as returned by the fetch worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Audio file written
    Succeeded {
        /// Path of the audio file
        path: PathBuf,
    },
    /// Job failed
    Failed {
        /// Error kind (see [`crate::Error::kind`])
        kind: String,
        /// Human-readable reason
        reason: String,
    },
}

impl JobOutcome {
    /// Whether the job succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

/// Batch controller state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Not started yet
    #[default]
    Idle,
    /// Draining the queue
    Running,
    /// Queue exhausted
    Completed,
    /// Stopped by cancellation
    Cancelled,
}

/// Aggregate result of a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every job succeeded
    AllSucceeded {
        /// Number of jobs
        succeeded: usize,
    },
    /// At least one job failed
    SomeFailed {
        /// Number of succeeded jobs
        succeeded: usize,
        /// Number of failed jobs
        failed: usize,
    },
    /// Batch was cancelled before the queue was exhausted
    Cancelled {
        /// Jobs that ran to completion (succeeded or failed)
        completed: usize,
        /// Jobs that never started
        cancelled: usize,
    },
}

impl BatchOutcome {
    /// Whether every job succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::AllSucceeded { .. })
    }
}

/// Everything known about a finished batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    /// Aggregate result
    pub outcome: BatchOutcome,
    /// Jobs in submission order, in their terminal state
    pub jobs: Vec<DownloadJob>,
    /// Batch start time
    pub started_at: DateTime<Utc>,
    /// Batch end time
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Jobs with the given status
    pub fn jobs_with_status(&self, status: JobStatus) -> impl Iterator<Item = &DownloadJob> {
        self.jobs.iter().filter(move |job| job.status == status)
    }
}

/// Event emitted during the batch lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Batch started
    BatchStarted {
        /// Number of jobs in the batch
        total: usize,
    },

    /// A job was picked up by the worker
    JobStarted {
        /// Job ID
        id: JobId,
        /// 1-based position in the batch
        index: usize,
        /// Number of jobs in the batch
        total: usize,
        /// Source URL
        url: String,
    },

    /// Job progress record
    Progress(ProgressEvent),

    /// A transient network failure is being retried
    Retrying {
        /// Job ID
        id: JobId,
        /// Retry number (1-based)
        attempt: u32,
        /// Configured retry limit
        max_attempts: u32,
        /// Delay before the next attempt, in milliseconds
        delay_ms: u64,
        /// The network error that triggered the retry
        error: String,
    },

    /// Credential source was unusable, continuing without credentials
    CredentialFallback {
        /// Job ID
        id: JobId,
        /// Why the source could not be used
        error: String,
    },

    /// A job reached its terminal status
    JobFinished {
        /// Job ID
        id: JobId,
        /// 1-based position in the batch
        index: usize,
        /// Number of jobs in the batch
        total: usize,
        /// Terminal status
        status: JobStatus,
        /// Audio file on success
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<PathBuf>,
        /// Failure reason
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Cancellation was requested
    CancelRequested,

    /// Batch finished
    BatchFinished {
        /// Aggregate result
        outcome: BatchOutcome,
    },
}
