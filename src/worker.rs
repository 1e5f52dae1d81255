//! Fetch worker: runs one job from URL to audio file
//!
//! The worker resolves credentials, asks the resolver for the media, streams
//! it to a temporary file (resuming single streams and retrying fragments
//! individually), hands it to the transcoder and cleans up. Every per-job
//! failure is turned into [`JobOutcome::Failed`] at the [`FetchWorker::run`]
//! boundary.

use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use url::Url;

use crate::config::{Config, RetryConfig};
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{Error, Result};
use crate::progress::{EventSink, ProgressThrottle};
use crate::resolver::{MediaResolver, MediaSource, ResolveOptions, ResolvedMedia, YtDlpResolver};
use crate::retry::retry_with_notify;
use crate::transcode::{FfmpegTranscoder, Transcoder, output_path_for};
use crate::transport::{HttpTransport, Transport};
use crate::types::{DownloadJob, Event, JobId, JobOutcome, Phase, ProgressEvent};

/// Executes download jobs one at a time
#[derive(Clone)]
pub struct FetchWorker {
    config: Arc<Config>,
    resolver: Arc<dyn MediaResolver>,
    transport: Arc<dyn Transport>,
    transcoder: Arc<dyn Transcoder>,
    credentials: CredentialProvider,
}

impl FetchWorker {
    /// Create a worker from explicit components
    ///
    /// The credential source is taken from `config.credentials`.
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<dyn MediaResolver>,
        transport: Arc<dyn Transport>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let credentials = CredentialProvider::new(config.credentials.clone());
        Self {
            config,
            resolver,
            transport,
            transcoder,
            credentials,
        }
    }

    /// Create a worker with the default `yt-dlp`, HTTP and ffmpeg components
    pub fn from_config(config: Config) -> Result<Self> {
        let resolver = YtDlpResolver::from_config(&config.tools)?;
        let transport = HttpTransport::new(&config.http)?;
        let transcoder = FfmpegTranscoder::from_config(&config.tools);
        tracing::info!(
            resolver = %resolver.binary_path().display(),
            encoder = %transcoder.binary_path().display(),
            "External tools located"
        );
        Ok(Self::new(
            Arc::new(config),
            Arc::new(resolver),
            Arc::new(transport),
            Arc::new(transcoder),
        ))
    }

    /// Configuration this worker runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one job to completion
    ///
    /// Emits a `Downloading` phase event first and exactly one terminal
    /// (`Done` or `Error`) progress event last. Never returns an error.
    pub async fn run(&self, job: &DownloadJob, events: &EventSink) -> JobOutcome {
        let started = Instant::now();
        match self.execute(job, events).await {
            Ok(path) => {
                tracing::info!(
                    job_id = %job.id,
                    path = %path.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                events.progress_event(ProgressEvent::phase(
                    job.id,
                    Phase::Done,
                    format!("Saved {}", path.display()),
                ));
                JobOutcome::Succeeded { path }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, url = %job.url, error = %e, "Job failed");
                events.progress_event(ProgressEvent::phase(job.id, Phase::Error, e.to_string()));
                JobOutcome::Failed {
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn execute(&self, job: &DownloadJob, events: &EventSink) -> Result<PathBuf> {
        events.progress_event(ProgressEvent::phase(
            job.id,
            Phase::Downloading,
            format!("Resolving {}", job.url),
        ));

        let credentials = self.job_credentials(job.id, events).await;
        let options = ResolveOptions {
            format_preference: self.config.download.format_preference.clone(),
            credentials,
            headers: self.config.http.headers.clone(),
        };
        let media = self.resolver.resolve(&job.url, &options).await?;
        tracing::info!(
            job_id = %job.id,
            title = %media.title,
            resolver = self.resolver.name(),
            "Media resolved"
        );

        tokio::fs::create_dir_all(&self.config.download.temp_dir).await?;
        let temp_path = self.temp_path(job.id, &media);

        let result = self.fetch_and_transcode(job, &media, &temp_path, events).await;

        match tokio::fs::remove_file(&temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                job_id = %job.id,
                path = %temp_path.display(),
                error = %e,
                "Failed to remove temporary file"
            ),
        }
        result
    }

    async fn fetch_and_transcode(
        &self,
        job: &DownloadJob,
        media: &ResolvedMedia,
        temp_path: &Path,
        events: &EventSink,
    ) -> Result<PathBuf> {
        let mut headers = self.config.http.headers.clone();
        headers.extend(media.http_headers.clone());

        let reporter = ByteReporter::new(job.id, events, self.config.download.progress_interval);
        let bytes = match &media.source {
            MediaSource::Direct { url, size } => {
                self.fetch_direct(job.id, url, *size, &headers, temp_path, &reporter, events)
                    .await?
            }
            MediaSource::Fragmented { fragments } => {
                self.fetch_fragments(job.id, fragments, &headers, temp_path, &reporter, events)
                    .await?
            }
        };
        tracing::debug!(job_id = %job.id, bytes, "Download finished");

        events.progress_event(ProgressEvent::phase(
            job.id,
            Phase::Transcoding,
            format!("Converting to {}", job.format),
        ));
        tokio::fs::create_dir_all(&job.dest_dir).await?;
        let output = output_path_for(&job.dest_dir, &media.title, job.format)?;
        self.transcoder
            .transcode(temp_path, &output, job.format, self.config.download.bitrate_kbps)
            .await?;
        Ok(output)
    }

    /// Stream a single resource, resuming from what is on disk after each failure
    #[allow(clippy::too_many_arguments)]
    async fn fetch_direct(
        &self,
        job_id: JobId,
        url: &Url,
        size_hint: Option<u64>,
        headers: &BTreeMap<String, String>,
        temp_path: &Path,
        reporter: &ByteReporter<'_>,
        events: &EventSink,
    ) -> Result<u64> {
        // Leftovers from an earlier run are not trusted
        tokio::fs::remove_file(temp_path).await.ok();

        let retry = &self.config.retry;
        let bytes = retry_with_notify(
            retry,
            || self.fetch_direct_once(url, size_hint, headers, temp_path, reporter),
            |attempt, e, delay| notify_retry(events, job_id, retry, attempt, e, delay, None),
        )
        .await?;
        reporter.finish(bytes, Some(bytes));
        Ok(bytes)
    }

    async fn fetch_direct_once(
        &self,
        url: &Url,
        size_hint: Option<u64>,
        headers: &BTreeMap<String, String>,
        temp_path: &Path,
        reporter: &ByteReporter<'_>,
    ) -> Result<u64> {
        let on_disk = match tokio::fs::metadata(temp_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let mut body = self.transport.open(url, headers, on_disk).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(temp_path)
            .await?;
        if body.offset != on_disk {
            file.set_len(body.offset).await?;
        }
        file.seek(SeekFrom::Start(body.offset)).await?;
        reporter.begin_attempt(body.offset);

        let total = body.total_size.or(size_hint);
        let mut done = body.offset;
        let copied: Result<()> = async {
            while let Some(chunk) = body.stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                done += chunk.len() as u64;
                reporter.report(done, total);
            }
            Ok(())
        }
        .await;
        // Whatever reached the file must be on disk before the next attempt measures it
        file.flush().await?;
        copied?;

        if let Some(expected) = body.total_size
            && done < expected
        {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {} of {} bytes", done, expected),
            )));
        }
        Ok(done)
    }

    /// Fetch fragments in order, each with its own retry budget
    async fn fetch_fragments(
        &self,
        job_id: JobId,
        fragments: &[Url],
        headers: &BTreeMap<String, String>,
        temp_path: &Path,
        reporter: &ByteReporter<'_>,
        events: &EventSink,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(temp_path).await?;
        let retry = &self.config.fragment_retry;
        let count = fragments.len();
        let mut done = 0u64;

        for (i, url) in fragments.iter().enumerate() {
            let label = format!("fragment {} of {}", i + 1, count);
            let data = retry_with_notify(
                retry,
                || self.fetch_fragment(url, headers),
                |attempt, e, delay| {
                    notify_retry(events, job_id, retry, attempt, e, delay, Some(&label))
                },
            )
            .await
            .map_err(|e| {
                tracing::warn!(job_id = %job_id, fragment = i + 1, error = %e, "Fragment failed");
                e
            })?;
            file.write_all(&data).await?;
            done += data.len() as u64;
            reporter.report(done, None);
        }
        file.flush().await?;
        reporter.finish(done, Some(done));
        Ok(done)
    }

    async fn fetch_fragment(&self, url: &Url, headers: &BTreeMap<String, String>) -> Result<Vec<u8>> {
        let mut body = self.transport.open(url, headers, 0).await?;
        let mut data = Vec::with_capacity(body.total_size.unwrap_or(0) as usize);
        while let Some(chunk) = body.stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    async fn job_credentials(&self, job_id: JobId, events: &EventSink) -> Credentials {
        match self.credentials.resolve().await {
            Ok(credentials) => {
                if credentials != Credentials::None {
                    tracing::info!(job_id = %job_id, credentials = %credentials, "Using credentials");
                }
                credentials
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Credentials unusable, continuing without");
                events.emit(Event::CredentialFallback {
                    id: job_id,
                    error: e.to_string(),
                });
                Credentials::None
            }
        }
    }

    fn temp_path(&self, job_id: JobId, media: &ResolvedMedia) -> PathBuf {
        self.config.download.temp_dir.join(format!(
            "mp3-dl-{}-{}.{}",
            std::process::id(),
            job_id,
            media.extension
        ))
    }
}

fn notify_retry(
    events: &EventSink,
    job_id: JobId,
    retry: &RetryConfig,
    attempt: u32,
    error: &Error,
    delay: std::time::Duration,
    context: Option<&str>,
) {
    let error = match context {
        Some(context) => format!("{}: {}", context, error),
        None => error.to_string(),
    };
    events.emit(Event::Retrying {
        id: job_id,
        attempt,
        max_attempts: retry.max_attempts,
        delay_ms: delay.as_millis() as u64,
        error,
    });
}

/// Throttled byte-progress reporting for one job
struct ByteReporter<'a> {
    job_id: JobId,
    events: &'a EventSink,
    throttle: Mutex<ProgressThrottle>,
}

impl<'a> ByteReporter<'a> {
    fn new(job_id: JobId, events: &'a EventSink, interval: std::time::Duration) -> Self {
        Self {
            job_id,
            events,
            throttle: Mutex::new(ProgressThrottle::new(interval)),
        }
    }

    /// Start measuring speed for a new transfer attempt beginning at `offset`
    fn begin_attempt(&self, offset: u64) {
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .restart(offset, Instant::now());
    }

    fn report(&self, done: u64, total: Option<u64>) {
        let now = Instant::now();
        let mut throttle = self.throttle.lock().unwrap_or_else(PoisonError::into_inner);
        if throttle.should_emit(now) {
            let event = throttle.downloading(self.job_id, done, total, now);
            drop(throttle);
            self.events.progress_event(event);
        }
    }

    /// Emit the final byte count regardless of the throttle
    fn finish(&self, done: u64, total: Option<u64>) {
        let now = Instant::now();
        let event = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .downloading(self.job_id, done, total, now);
        self.events.progress_event(event);
    }
}
