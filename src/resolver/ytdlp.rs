//! `yt-dlp`-backed media resolver

use super::{MediaResolver, MediaSource, ResolveOptions, ResolvedMedia};
use crate::config::ToolsConfig;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use url::Url;

const BINARY_NAME: &str = "yt-dlp";

/// Resolver driving the external `yt-dlp` binary in metadata-only mode
///
/// ```no_run
/// use mp3_dl::resolver::YtDlpResolver;
/// use std::path::PathBuf;
///
/// // Explicit path
/// let resolver = YtDlpResolver::new(PathBuf::from("/usr/local/bin/yt-dlp"));
///
/// // Or auto-discover from PATH
/// let resolver = YtDlpResolver::from_path().expect("yt-dlp not found in PATH");
/// ```
#[derive(Clone, Debug)]
pub struct YtDlpResolver {
    binary_path: PathBuf,
}

impl YtDlpResolver {
    /// Create a resolver with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `yt-dlp` in PATH
    pub fn from_path() -> Option<Self> {
        which::which(BINARY_NAME).ok().map(Self::new)
    }

    /// Build a resolver from tool configuration
    ///
    /// An explicit `resolver_path` wins; otherwise PATH is searched when
    /// `search_path` is enabled.
    pub fn from_config(tools: &ToolsConfig) -> Result<Self> {
        if let Some(path) = &tools.resolver_path {
            return Ok(Self::new(path.clone()));
        }
        if tools.search_path
            && let Some(resolver) = Self::from_path()
        {
            return Ok(resolver);
        }
        Err(Error::ExternalTool(format!(
            "{} not found (set tools.resolver_path or install it in PATH)",
            BINARY_NAME
        )))
    }

    /// Path of the binary this resolver runs
    pub fn binary_path(&self) -> &PathBuf {
        &self.binary_path
    }

    fn build_args(url: &Url, options: &ResolveOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--dump-single-json".into(),
            "--no-download".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "-f".into(),
            options.format_preference.clone().into(),
        ];

        match &options.credentials {
            Credentials::None => {}
            Credentials::CookieFile(path) => {
                args.push("--cookies".into());
                args.push(path.clone().into_os_string());
            }
            Credentials::Browser(browser) => {
                args.push("--cookies-from-browser".into());
                args.push(browser.as_str().into());
            }
        }

        for (name, value) in &options.headers {
            args.push("--add-header".into());
            args.push(format!("{}:{}", name, value).into());
        }

        args.push("--".into());
        args.push(url.as_str().into());
        args
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, url: &Url, options: &ResolveOptions) -> Result<ResolvedMedia> {
        let args = Self::build_args(url, options);
        tracing::debug!(
            binary = %self.binary_path.display(),
            url = %url,
            credentials = %options.credentials,
            "Running resolver"
        );

        let output = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::ExternalTool(format!(
                    "failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Resolver(error_summary(&stderr).unwrap_or_else(|| {
                format!("{} exited with {}", BINARY_NAME, output.status)
            })));
        }

        parse_info(&output.stdout)
    }

    fn name(&self) -> &'static str {
        BINARY_NAME
    }
}

/// Pick the most useful line of resolver stderr
fn error_summary(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let line = lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())?;
    Some(line.trim_start_matches("ERROR:").trim().to_string())
}

#[derive(Debug, Default, Deserialize)]
struct FormatInfo {
    url: Option<String>,
    ext: Option<String>,
    protocol: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<f64>,
    acodec: Option<String>,
    vcodec: Option<String>,
    fragment_base_url: Option<String>,
    #[serde(default)]
    fragments: Vec<FragmentInfo>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
}

impl FormatInfo {
    fn is_downloadable(&self) -> bool {
        self.url.is_some() || !self.fragments.is_empty()
    }

    fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref() == Some("none") && self.acodec.as_deref().is_some_and(|a| a != "none")
    }
}

#[derive(Debug, Deserialize)]
struct FragmentInfo {
    url: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    #[serde(flatten)]
    format: FormatInfo,
    #[serde(default)]
    requested_formats: Vec<FormatInfo>,
}

/// Parse the JSON document printed by `--dump-single-json`
fn parse_info(json: &[u8]) -> Result<ResolvedMedia> {
    let info: MediaInfo = serde_json::from_slice(json)
        .map_err(|e| Error::Resolver(format!("unreadable resolver output: {}", e)))?;

    if matches!(info.kind.as_deref(), Some("playlist" | "multi_video")) {
        return Err(Error::Resolver(
            "playlist URLs are not supported; enqueue the entries individually".to_string(),
        ));
    }

    let MediaInfo {
        title,
        uploader,
        format,
        mut requested_formats,
        ..
    } = info;

    // Merged selections (video+audio) only list their parts
    let format = if format.is_downloadable() {
        format
    } else {
        let audio = requested_formats.iter().position(FormatInfo::is_audio_only);
        match audio {
            Some(i) => requested_formats.swap_remove(i),
            None if !requested_formats.is_empty() => requested_formats.swap_remove(0),
            None => return Err(Error::Resolver("no downloadable format found".to_string())),
        }
    };

    let source = media_source(&format)?;
    Ok(ResolvedMedia {
        title: title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| "untitled".to_string()),
        uploader,
        extension: format.ext.clone().unwrap_or_else(|| "bin".to_string()),
        source,
        http_headers: format.http_headers,
    })
}

fn media_source(format: &FormatInfo) -> Result<MediaSource> {
    if !format.fragments.is_empty() {
        let base = format
            .fragment_base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::Resolver(format!("invalid fragment base URL: {}", e)))?;

        let fragments = format
            .fragments
            .iter()
            .map(|fragment| match (&fragment.url, &fragment.path, &base) {
                (Some(url), _, _) => Url::parse(url),
                (None, Some(path), Some(base)) => base.join(path),
                _ => Err(url::ParseError::RelativeUrlWithoutBase),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Resolver(format!("invalid fragment URL: {}", e)))?;
        return Ok(MediaSource::Fragmented { fragments });
    }

    if format.protocol.as_deref().is_some_and(|p| p.starts_with("m3u8")) {
        return Err(Error::Resolver(
            "HLS streams are not supported; choose a format preference with a direct audio stream"
                .to_string(),
        ));
    }

    let url = format
        .url
        .as_deref()
        .ok_or_else(|| Error::Resolver("no downloadable format found".to_string()))?;
    let url = Url::parse(url).map_err(|e| Error::Resolver(format!("invalid media URL: {}", e)))?;
    let size = format
        .filesize
        .or_else(|| format.filesize_approx.map(|approx| approx as u64));
    Ok(MediaSource::Direct { url, size })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Browser;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<ResolvedMedia> {
        parse_info(value.to_string().as_bytes())
    }

    #[test]
    fn test_args_with_cookie_file_and_headers() {
        let url = Url::parse("https://valid.example/watch?v=1").unwrap();
        let mut options = ResolveOptions {
            credentials: Credentials::CookieFile(PathBuf::from("/cookies/a.txt")),
            ..ResolveOptions::default()
        };
        options
            .headers
            .insert("Accept-Language".to_string(), "en-us,en;q=0.5".to_string());

        let args: Vec<String> = YtDlpResolver::build_args(&url, &options)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..2], ["--dump-single-json", "--no-download"]);
        let pos = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[pos + 1], "bestaudio/best");
        let pos = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[pos + 1], "/cookies/a.txt");
        let pos = args.iter().position(|a| a == "--add-header").unwrap();
        assert_eq!(args[pos + 1], "Accept-Language:en-us,en;q=0.5");
        assert_eq!(args.last().unwrap(), "https://valid.example/watch?v=1");
        assert!(!args.iter().any(|a| a == "--cookies-from-browser"));
    }

    #[test]
    fn test_args_with_browser() {
        let url = Url::parse("https://valid.example/a").unwrap();
        let options = ResolveOptions {
            credentials: Credentials::Browser(Browser::Firefox),
            ..ResolveOptions::default()
        };
        let args = YtDlpResolver::build_args(&url, &options);
        let pos = args.iter().position(|a| a == "--cookies-from-browser").unwrap();
        assert_eq!(args[pos + 1], "firefox");
    }

    #[test]
    fn test_parse_direct_stream() {
        let media = parse(json!({
            "_type": "video",
            "title": "Some Song",
            "uploader": "Some Artist",
            "ext": "webm",
            "protocol": "https",
            "url": "https://media.example/audio.webm",
            "filesize": 4096,
            "http_headers": {"User-Agent": "UA"}
        }))
        .unwrap();

        assert_eq!(media.title, "Some Song");
        assert_eq!(media.uploader.as_deref(), Some("Some Artist"));
        assert_eq!(media.extension, "webm");
        assert_eq!(
            media.source,
            MediaSource::Direct {
                url: Url::parse("https://media.example/audio.webm").unwrap(),
                size: Some(4096),
            }
        );
        assert_eq!(media.http_headers.get("User-Agent").unwrap(), "UA");
    }

    #[test]
    fn test_parse_fragments_with_base_url() {
        let media = parse(json!({
            "title": "Segmented",
            "ext": "m4a",
            "protocol": "http_dash_segments",
            "fragment_base_url": "https://cdn.example/audio/",
            "fragments": [
                {"path": "seg-1.m4s"},
                {"path": "seg-2.m4s"},
                {"url": "https://other.example/seg-3.m4s"}
            ]
        }))
        .unwrap();

        match media.source {
            MediaSource::Fragmented { fragments } => {
                let urls: Vec<&str> = fragments.iter().map(Url::as_str).collect();
                assert_eq!(
                    urls,
                    vec![
                        "https://cdn.example/audio/seg-1.m4s",
                        "https://cdn.example/audio/seg-2.m4s",
                        "https://other.example/seg-3.m4s",
                    ]
                );
            }
            other => panic!("expected fragments, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_merged_selection_prefers_audio_part() {
        let media = parse(json!({
            "title": "Merged",
            "ext": "mkv",
            "requested_formats": [
                {"url": "https://media.example/video.mp4", "ext": "mp4", "vcodec": "avc1", "acodec": "none"},
                {"url": "https://media.example/audio.m4a", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2"}
            ]
        }))
        .unwrap();
        assert_eq!(media.extension, "m4a");
        assert!(matches!(
            media.source,
            MediaSource::Direct { ref url, .. } if url.as_str() == "https://media.example/audio.m4a"
        ));
    }

    #[test]
    fn test_playlist_is_rejected() {
        let err = parse(json!({
            "_type": "playlist",
            "title": "Mix",
            "entries": [{"url": "https://valid.example/a"}]
        }))
        .unwrap_err();
        match err {
            Error::Resolver(msg) => assert!(msg.contains("playlist"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_hls_and_missing_url_are_resolver_errors() {
        let err = parse(json!({"title": "Live", "protocol": "m3u8_native", "url": "https://x.example/a.m3u8"}))
            .unwrap_err();
        assert!(matches!(err, Error::Resolver(_)));

        let err = parse(json!({"title": "Nothing"})).unwrap_err();
        assert!(matches!(err, Error::Resolver(_)));

        let err = parse_info(b"not json").unwrap_err();
        assert!(matches!(err, Error::Resolver(_)));
    }

    #[test]
    fn test_error_summary_prefers_error_line() {
        let stderr = "[youtube] abc: Downloading webpage\nERROR: [youtube] abc: Video unavailable\n\n";
        assert_eq!(
            error_summary(stderr).as_deref(),
            Some("[youtube] abc: Video unavailable")
        );
        assert_eq!(error_summary("   \n").as_deref(), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_tool_error() {
        let resolver = YtDlpResolver::new(PathBuf::from("/nonexistent/bin/yt-dlp-xyz"));
        let url = Url::parse("https://valid.example/a").unwrap();
        let err = resolver
            .resolve(&url, &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalTool(_)), "{err:?}");
    }

    #[test]
    fn test_from_config_prefers_explicit_path() {
        let tools = ToolsConfig {
            resolver_path: Some(PathBuf::from("/opt/yt-dlp")),
            encoder_path: None,
            search_path: false,
        };
        let resolver = YtDlpResolver::from_config(&tools).unwrap();
        assert_eq!(resolver.binary_path(), &PathBuf::from("/opt/yt-dlp"));

        let tools = ToolsConfig {
            resolver_path: None,
            encoder_path: None,
            search_path: false,
        };
        assert!(matches!(
            YtDlpResolver::from_config(&tools),
            Err(Error::ExternalTool(_))
        ));
    }
}
