//! # mp3-dl
//!
//! Batch URL-to-audio downloader library.
//!
//! ## Design Philosophy
//!
//! mp3-dl is designed to be:
//! - **Sequential and polite** - One job at a time, with a jittered pause between jobs
//! - **Resilient** - Transient network failures are retried with exponential backoff,
//!   single streams resume from what is already on disk
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Explicitly configured** - Tool paths, cookie pools and headers live in [`Config`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use mp3_dl::{BatchController, Config, FetchWorker, JobQueue};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let queue = JobQueue::from_lines(
//!         "https://www.youtube.com/watch?v=dQw4w9WgXcQ\n",
//!         Path::new("downloads"),
//!         config.download.format,
//!     )?;
//!
//!     let controller = BatchController::new(FetchWorker::from_config(config)?);
//!
//!     // Subscribe to events
//!     let mut events = controller.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = controller.start(queue)?.wait().await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch controller
pub mod controller;
/// Credential sources (cookie pools, browser cookie stores)
pub mod credentials;
/// Error types
pub mod error;
/// Event fan-out and progress snapshots
pub mod progress;
/// Job queue
pub mod queue;
/// Media resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Audio transcoding
pub mod transcode;
/// Byte transport
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Fetch worker
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, HttpConfig, PacingConfig, RetryConfig, ToolsConfig};
pub use controller::{BatchController, BatchHandle};
pub use credentials::{Browser, CredentialProvider, CredentialSource, Credentials};
pub use error::{BatchError, CredentialError, Error, Result, TranscodeError};
pub use progress::{EventSink, ProgressSnapshot, ProgressThrottle};
pub use queue::JobQueue;
pub use resolver::{MediaResolver, MediaSource, ResolveOptions, ResolvedMedia, YtDlpResolver};
pub use retry::IsRetryable;
pub use transcode::{FfmpegTranscoder, Transcoder};
pub use transport::{ByteStream, HttpTransport, Transport};
pub use types::{
    BatchOutcome, BatchReport, BatchStatus, DownloadJob, Event, JobId, JobOutcome, JobStatus,
    OutputFormat, Phase, ProgressEvent,
};
pub use worker::FetchWorker;

/// Run a batch with graceful signal handling.
///
/// The first termination signal cancels the batch cooperatively: the job in
/// flight finishes and the rest are cancelled. A second signal abandons the
/// batch and returns [`BatchError::Interrupted`].
///
/// - **Unix:** SIGTERM or Ctrl+C; Ctrl+C only if the SIGTERM handler cannot be registered.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use mp3_dl::{BatchController, Config, FetchWorker, JobQueue, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let controller = BatchController::new(FetchWorker::from_config(Config::default())?);
///     let report = run_with_shutdown(&controller, JobQueue::new()).await?;
///     println!("{:?}", report.outcome);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    controller: &BatchController,
    queue: JobQueue,
) -> Result<BatchReport> {
    let handle = controller.start(queue)?;
    let wait = handle.wait();
    tokio::pin!(wait);

    tokio::select! {
        report = &mut wait => return report,
        _ = wait_for_signal() => {
            controller.cancel();
        }
    }

    tokio::select! {
        report = &mut wait => report,
        _ = wait_for_signal() => {
            tracing::warn!("Second signal received, abandoning batch");
            Err(BatchError::Interrupted.into())
        }
    }
}

/// Resolve on SIGTERM or Ctrl+C; never resolves if no handler can be installed
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                result = tokio::signal::ctrl_c() => on_ctrl_c(result).await,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, listening for Ctrl+C only");
            on_ctrl_c(tokio::signal::ctrl_c().await).await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    on_ctrl_c(tokio::signal::ctrl_c().await).await;
}

async fn on_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
