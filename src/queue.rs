//! FIFO job queue built from user input

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Error, Result};
use crate::types::{DownloadJob, JobId, OutputFormat};

/// Ordered sequence of pending download jobs
///
/// Jobs come out in insertion order; there is no priority. Duplicate URLs are
/// kept as separate jobs.
#[derive(Debug)]
pub struct JobQueue {
    jobs: VecDeque<DownloadJob>,
    next_id: u64,
    format: OutputFormat,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Create an empty queue producing jobs in the default format
    pub fn new() -> Self {
        Self::with_format(OutputFormat::default())
    }

    /// Create an empty queue producing jobs in `format`
    pub fn with_format(format: OutputFormat) -> Self {
        Self {
            jobs: VecDeque::new(),
            next_id: 1,
            format,
        }
    }

    /// Build a queue from multi-line input, one URL per line
    ///
    /// Lines are trimmed and blank lines are skipped. The first malformed line
    /// fails the whole input with its 1-based line number.
    pub fn from_lines(input: &str, dest_dir: &Path, format: OutputFormat) -> Result<Self> {
        let mut queue = Self::with_format(format);
        for (line_no, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            queue.enqueue(line, dest_dir).map_err(|e| match e {
                Error::InvalidInput(reason) => {
                    Error::InvalidInput(format!("line {}: {}", line_no + 1, reason))
                }
                other => other,
            })?;
        }
        Ok(queue)
    }

    /// Append a job for `url`
    ///
    /// Fails with [`Error::InvalidInput`] when the URL is empty or is not an
    /// absolute http(s) URL with a host.
    pub fn enqueue(&mut self, url: &str, dest_dir: &Path) -> Result<JobId> {
        let url = parse_source_url(url)?;
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.jobs.push_back(DownloadJob::new(
            id,
            url,
            PathBuf::from(dest_dir),
            self.format,
        ));
        Ok(id)
    }

    /// Remove and return the next job, or `None` when exhausted
    pub fn dequeue_next(&mut self) -> Option<DownloadJob> {
        self.jobs.pop_front()
    }

    /// Number of jobs left
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are left
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Iterate over the remaining jobs in order
    pub fn iter(&self) -> impl Iterator<Item = &DownloadJob> {
        self.jobs.iter()
    }
}

/// Validate a user-supplied source URL
pub fn parse_source_url(input: &str) -> Result<Url> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("URL is empty".to_string()));
    }

    let url = Url::parse(input)
        .map_err(|e| Error::InvalidInput(format!("malformed URL '{}': {}", input, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(format!(
            "unsupported URL scheme '{}' in '{}'",
            url.scheme(),
            input
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidInput(format!("URL '{}' has no host", input)));
    }
    Ok(url)
}
