//! Media resolution: turning a page URL into a downloadable audio resource
//!
//! The core abstraction is the [`MediaResolver`] trait. The default
//! implementation, [`YtDlpResolver`], runs the `yt-dlp` binary in
//! metadata-only mode and parses its JSON description; the bytes themselves
//! are fetched by a [`crate::transport::Transport`].
//!
//! ## Usage
//!
//! ```no_run
//! use mp3_dl::resolver::{MediaResolver, ResolveOptions, YtDlpResolver};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = YtDlpResolver::from_path().ok_or("yt-dlp not found")?;
//!     let url = Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ")?;
//!     let media = resolver.resolve(&url, &ResolveOptions::default()).await?;
//!     println!("{} ({})", media.title, media.extension);
//!     Ok(())
//! }
//! ```

mod ytdlp;

pub use ytdlp::YtDlpResolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::credentials::Credentials;

/// Options passed to the resolver for one job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Format selector, e.g. `bestaudio/best`
    pub format_preference: String,
    /// Credentials resolved for this job
    pub credentials: Credentials,
    /// Extra HTTP headers the resolver should send
    pub headers: BTreeMap<String, String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            format_preference: "bestaudio/best".to_string(),
            credentials: Credentials::None,
            headers: BTreeMap::new(),
        }
    }
}

/// Where the media bytes live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    /// One resource fetched as a single stream
    Direct {
        /// Resource URL
        url: Url,
        /// Size in bytes when advertised
        size: Option<u64>,
    },
    /// Segmented media, fragments concatenated in order
    Fragmented {
        /// Fragment URLs in playback order
        fragments: Vec<Url>,
    },
}

/// A resolved remote media resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    /// Media title, used for the output file name
    pub title: String,
    /// Uploader or channel name
    pub uploader: Option<String>,
    /// Container extension of the downloaded stream (`webm`, `m4a`, ...)
    pub extension: String,
    /// Where to fetch the bytes from
    pub source: MediaSource,
    /// Headers required when fetching `source`
    pub http_headers: BTreeMap<String, String>,
}

/// Trait for media resolvers
///
/// Failures are reported as [`crate::Error::Resolver`] (the remote rejected the
/// URL or content) or [`crate::Error::ExternalTool`] (the resolver could not be
/// run). Neither is retried.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve `url` into a downloadable resource
    async fn resolve(&self, url: &Url, options: &ResolveOptions) -> crate::Result<ResolvedMedia>;

    /// Name of the implementation (for logging)
    fn name(&self) -> &'static str;
}
