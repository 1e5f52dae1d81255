//! Fixtures: a resolver pointing at a mock HTTP server and a copying transcoder

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use mp3_dl::{
    BatchController, Config, Error, Event, FetchWorker, HttpTransport, MediaResolver, MediaSource,
    OutputFormat, PacingConfig, ResolveOptions, ResolvedMedia, RetryConfig, TranscodeError,
    Transcoder,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

/// Resolves `https://<any>/<name>` to `<base>/media/<name>.webm`
///
/// Names listed in `unavailable` are rejected like a removed video.
pub struct MockServerResolver {
    base: Url,
    unavailable: Vec<String>,
}

impl MockServerResolver {
    pub fn new(base: &str) -> Self {
        Self {
            base: Url::parse(&format!("{}/", base.trim_end_matches('/'))).unwrap(),
            unavailable: Vec::new(),
        }
    }

    pub fn with_unavailable(mut self, name: &str) -> Self {
        self.unavailable.push(name.to_string());
        self
    }
}

#[async_trait]
impl MediaResolver for MockServerResolver {
    async fn resolve(&self, url: &Url, _options: &ResolveOptions) -> mp3_dl::Result<ResolvedMedia> {
        let name = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or("untitled")
            .to_string();
        if self.unavailable.contains(&name) {
            return Err(Error::Resolver(format!("[mock] {}: Video unavailable", name)));
        }
        Ok(ResolvedMedia {
            title: name.clone(),
            uploader: Some("Mock Uploader".to_string()),
            extension: "webm".to_string(),
            source: MediaSource::Direct {
                url: self.base.join(&format!("media/{}.webm", name)).unwrap(),
                size: None,
            },
            http_headers: BTreeMap::new(),
        })
    }

    fn name(&self) -> &'static str {
        "mock-server"
    }
}

/// Transcoder that copies the input, optionally after a delay
pub struct CopyTranscoder {
    pub delay: Duration,
}

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _format: OutputFormat,
        _bitrate_kbps: u32,
    ) -> Result<(), TranscodeError> {
        tokio::time::sleep(self.delay).await;
        tokio::fs::copy(input, output)
            .await
            .map(|_| ())
            .map_err(|e| TranscodeError::SpawnFailed {
                tool: "copy".to_string(),
                reason: e.to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

/// Config rooted in `root`: no pacing, three fast retries
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.output_dir = root.join("music");
    config.download.temp_dir = root.join("tmp");
    config.pacing = PacingConfig::disabled();
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: true,
    };
    config.fragment_retry = config.retry.clone();
    config
}

/// Controller using the real HTTP transport against the mock server
pub fn controller(config: Config, resolver: MockServerResolver, delay: Duration) -> BatchController {
    let transport = HttpTransport::new(&config.http).unwrap();
    let worker = FetchWorker::new(
        Arc::new(config),
        Arc::new(resolver),
        Arc::new(transport),
        Arc::new(CopyTranscoder { delay }),
    );
    BatchController::new(worker)
}

/// Everything buffered on the receiver
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}
