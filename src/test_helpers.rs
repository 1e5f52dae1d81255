//! Shared test helpers: stub resolver, transport and transcoder, plus a fast config.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::config::{Config, PacingConfig, RetryConfig};
use crate::error::{Error, Result, TranscodeError};
use crate::resolver::{MediaResolver, MediaSource, ResolveOptions, ResolvedMedia};
use crate::transcode::Transcoder;
use crate::transport::{ByteStream, Transport};
use crate::types::OutputFormat;
use crate::worker::FetchWorker;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Retry policy with millisecond delays so tests stay fast
pub(crate) fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Config rooted in `root` with no pacing and fast retries
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.output_dir = root.join("out");
    config.download.temp_dir = root.join("tmp");
    config.download.progress_interval = Duration::from_millis(1);
    config.retry = fast_retry(3);
    config.fragment_retry = fast_retry(3);
    config.pacing = PacingConfig::disabled();
    config
}

/// Worker wired to the given stubs
pub(crate) fn stub_worker(
    config: Config,
    resolver: StubResolver,
    transport: StubTransport,
    transcoder: StubTranscoder,
) -> FetchWorker {
    FetchWorker::new(
        Arc::new(config),
        Arc::new(resolver),
        Arc::new(transport),
        Arc::new(transcoder),
    )
}

/// Resolver returning a fixed media description
pub(crate) struct StubResolver {
    source: MediaSource,
    fail_with: Option<String>,
    pub(crate) last_options: Mutex<Option<ResolveOptions>>,
}

impl StubResolver {
    /// Single direct stream per URL; the title is the last path segment
    pub(crate) fn direct() -> Self {
        Self {
            source: MediaSource::Direct {
                url: media_url("stream.webm"),
                size: None,
            },
            fail_with: None,
            last_options: Mutex::new(None),
        }
    }

    /// `count` fragments
    pub(crate) fn fragmented(count: usize) -> Self {
        Self {
            source: MediaSource::Fragmented {
                fragments: (1..=count)
                    .map(|i| media_url(&format!("seg-{i}.m4s")))
                    .collect(),
            },
            ..Self::direct()
        }
    }

    /// Always rejects the URL
    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::direct()
        }
    }
}

#[async_trait]
impl MediaResolver for StubResolver {
    async fn resolve(&self, url: &Url, options: &ResolveOptions) -> Result<ResolvedMedia> {
        *self.last_options.lock().unwrap() = Some(options.clone());
        if let Some(reason) = &self.fail_with {
            return Err(Error::Resolver(reason.clone()));
        }
        let title = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("untitled")
            .to_string();
        Ok(ResolvedMedia {
            title,
            uploader: None,
            extension: "webm".to_string(),
            source: self.source.clone(),
            http_headers: BTreeMap::new(),
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

fn media_url(name: &str) -> Url {
    Url::parse(&format!("https://media.example/{name}")).unwrap()
}

/// Transport serving a fixed body, with scripted failures
pub(crate) struct StubTransport {
    body: Vec<u8>,
    chunk_size: usize,
    failures_remaining: AtomicU32,
    fail_status: u16,
    interrupt_after: Mutex<Option<usize>>,
    pub(crate) opens: Mutex<Vec<(Url, u64)>>,
}

impl StubTransport {
    pub(crate) fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            chunk_size: 4,
            failures_remaining: AtomicU32::new(0),
            fail_status: 503,
            interrupt_after: Mutex::new(None),
            opens: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `n` opens with HTTP 503
    pub(crate) fn failing_first(self, n: u32) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every open with `status`
    pub(crate) fn always_failing(mut self, status: u16) -> Self {
        self.fail_status = status;
        self.failing_first(u32::MAX)
    }

    /// Break the first stream after `bytes` bytes
    pub(crate) fn interrupted_after(self, bytes: usize) -> Self {
        *self.interrupt_after.lock().unwrap() = Some(bytes);
        self
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn open(
        &self,
        url: &Url,
        _headers: &BTreeMap<String, String>,
        offset: u64,
    ) -> Result<ByteStream> {
        self.opens.lock().unwrap().push((url.clone(), offset));

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(Error::Http {
                status: self.fail_status,
                url: url.to_string(),
            });
        }

        let start = (offset as usize).min(self.body.len());
        let mut data = self.body[start..].to_vec();
        let interrupt = self.interrupt_after.lock().unwrap().take();
        let mut chunks: Vec<Result<Bytes>> = Vec::new();
        if let Some(limit) = interrupt {
            data.truncate(limit);
        }
        chunks.extend(
            data.chunks(self.chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c))),
        );
        if interrupt.is_some() {
            chunks.push(Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))));
        }

        Ok(ByteStream {
            offset: start as u64,
            total_size: Some(self.body.len() as u64),
            stream: stream::iter(chunks).boxed(),
        })
    }
}

/// Transcoder copying its input, optionally slow or failing
pub(crate) struct StubTranscoder {
    delay: Duration,
    fail: bool,
    pub(crate) calls: AtomicU32,
}

impl StubTranscoder {
    pub(crate) fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _format: OutputFormat,
        _bitrate_kbps: u32,
    ) -> std::result::Result<(), TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(TranscodeError::NonZeroExit {
                code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| TranscodeError::SpawnFailed {
                tool: "stub".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
