//! Error types for mp3-dl
//!
//! This module provides the error taxonomy for the library:
//! - Input validation failures (rejected at enqueue time)
//! - Transient network failures (retried by the fetch worker)
//! - Resolver and transcoder failures (surfaced immediately as job failures)
//! - Credential problems (downgraded to warnings by the worker)
//! - Batch sequencing misuse (the only fatal kind at runtime)

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Result type alias for mp3-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mp3-dl
///
/// Per-job variants are caught at the fetch worker boundary and turned into a
/// failed job; they never abort a batch.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pacing.sleep_interval_min")
        key: Option<String>,
    },

    /// Empty or malformed user input (bad URL)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The media resolver rejected the URL or its content
    #[error("resolver error: {0}")]
    Resolver(String),

    /// Transcoding failed
    #[error("transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    /// Selected credential source is unusable
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Batch controller misuse or sequencing error
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (resolver binary could not be spawned, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the transcode step
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Encoder binary not found at the configured path or in PATH
    #[error("encoder '{tool}' not found")]
    ToolNotFound {
        /// Name or path of the missing tool
        tool: String,
    },

    /// Encoder could not be started
    #[error("failed to run encoder '{tool}': {reason}")]
    SpawnFailed {
        /// Name or path of the tool
        tool: String,
        /// OS-level failure description
        reason: String,
    },

    /// Encoder exited with a non-zero status
    #[error("encoder exited with {code:?}: {stderr}")]
    NonZeroExit {
        /// Exit code (None when killed by a signal)
        code: Option<i32>,
        /// Tail of the encoder's stderr
        stderr: String,
    },

    /// Encoder reported success but the output file is missing or empty
    #[error("encoder produced no output at {path}")]
    MissingOutput {
        /// Expected output path
        path: PathBuf,
    },
}

/// Errors raised while resolving a credential source
///
/// These are never fatal: the worker logs them and continues without credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Cookie pool directory does not exist
    #[error("cookie directory {dir} does not exist")]
    PoolMissing {
        /// Configured pool directory
        dir: PathBuf,
    },

    /// Cookie pool directory contains no cookie files
    #[error("no cookie files found in {dir}")]
    PoolEmpty {
        /// Configured pool directory
        dir: PathBuf,
    },

    /// Cookie pool directory could not be listed
    #[error("failed to read cookie directory {dir}: {reason}")]
    PoolUnreadable {
        /// Configured pool directory
        dir: PathBuf,
        /// Underlying I/O failure
        reason: String,
    },

    /// Browser name outside the supported set
    #[error("unsupported browser '{0}' (expected one of firefox, chrome, edge, brave, opera, safari)")]
    UnsupportedBrowser(String),
}

/// Errors from the batch controller's own sequencing
#[derive(Debug, Error)]
pub enum BatchError {
    /// `start` called on a controller that is not idle
    #[error("batch already started")]
    AlreadyStarted,

    /// A second interrupt arrived while waiting for a cancelled batch
    #[error("batch abandoned after a second interrupt")]
    Interrupted,

    /// A job status change would move backwards
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Job being updated
        id: JobId,
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// The batch task terminated abnormally
    #[error("batch task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Short machine-readable kind, used in events and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::InvalidInput(_) => "invalid_input",
            Error::Network(_) | Error::Http { .. } => "network",
            Error::Resolver(_) => "resolver",
            Error::Transcode(_) => "transcode",
            Error::Credential(_) => "credential",
            Error::Batch(_) => "batch",
            Error::Io(_) if crate::retry::IsRetryable::is_retryable(self) => "network",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::ExternalTool(_) => "external_tool",
            Error::Other(_) => "other",
        }
    }
}
