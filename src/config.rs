//! Configuration types for mp3-dl

use crate::credentials::CredentialSource;
use crate::error::{Error, Result};
use crate::types::OutputFormat;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

/// Download behavior configuration (directories, output format, progress cadence)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory receiving the audio files (default: "downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory for partial media files (default: `<system temp>/mp3-dl`)
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Target audio format (default: mp3)
    #[serde(default)]
    pub format: OutputFormat,

    /// Target bitrate in kbit/s for lossy formats (default: 192)
    #[serde(default = "default_bitrate")]
    pub bitrate_kbps: u32,

    /// Format selector handed to the resolver (default: "bestaudio/best")
    #[serde(default = "default_format_preference")]
    pub format_preference: String,

    /// Minimum interval between byte-progress events (default: 250ms)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    pub progress_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
            format: OutputFormat::default(),
            bitrate_kbps: default_bitrate(),
            format_preference: default_format_preference(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Backoff policy for transient network failures
///
/// Used twice: once for whole-file fetches and once per fragment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first failed attempt (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before the first retry, in seconds (default: 1)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Upper bound on any single pause, in seconds (default: 60)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive pauses, at least 1.0 (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Stretch each pause by a random 0-100% (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Idle delay between consecutive job starts
///
/// The actual delay is drawn uniformly from `[sleep_interval_min, sleep_interval_max]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Lower bound of the delay (default: 5 seconds)
    #[serde(default = "default_sleep_min", with = "duration_serde")]
    pub sleep_interval_min: Duration,

    /// Upper bound of the delay (default: 15 seconds)
    #[serde(default = "default_sleep_max", with = "duration_serde")]
    pub sleep_interval_max: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sleep_interval_min: default_sleep_min(),
            sleep_interval_max: default_sleep_max(),
        }
    }
}

impl PacingConfig {
    /// No delay between jobs
    pub fn disabled() -> Self {
        Self {
            sleep_interval_min: Duration::ZERO,
            sleep_interval_max: Duration::ZERO,
        }
    }

    /// Draw the next inter-job delay
    pub fn next_delay<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.sleep_interval_min.as_secs_f64();
        let max = self.sleep_interval_max.as_secs_f64();
        if max <= min {
            return self.sleep_interval_min;
        }
        Duration::from_secs_f64(rng.gen_range(min..=max))
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Headers sent with every media request (resolver-provided headers take precedence)
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: default_headers(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// External tool paths (resolver, encoder)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub resolver_path: Option<PathBuf>,

    /// Path to the ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub encoder_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            resolver_path: None,
            encoder_path: None,
            search_path: true,
        }
    }
}

/// Main configuration, passed explicitly to every component that needs it
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directories, output format, progress cadence
    #[serde(default)]
    pub download: DownloadConfig,

    /// Whole-job retries (default: 10 attempts)
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-fragment retries for segmented streams (default: 10 attempts)
    #[serde(default)]
    pub fragment_retry: RetryConfig,

    /// Delay between job starts
    #[serde(default)]
    pub pacing: PacingConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// External binaries
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Where cookies come from
    #[serde(default)]
    pub credentials: CredentialSource,
}

impl Config {
    /// Load configuration from a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read '{}': {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.pacing.sleep_interval_min > self.pacing.sleep_interval_max {
            return Err(config_error(
                "sleep_interval_min must not exceed sleep_interval_max",
                "pacing.sleep_interval_min",
            ));
        }
        for (key, retry) in [("retry", &self.retry), ("fragment_retry", &self.fragment_retry)] {
            if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
                return Err(config_error(
                    "backoff_multiplier must be a finite number of at least 1.0",
                    &format!("{key}.backoff_multiplier"),
                ));
            }
            if retry.initial_delay > retry.max_delay {
                return Err(config_error(
                    "initial_delay must not exceed max_delay",
                    &format!("{key}.initial_delay"),
                ));
            }
        }
        if self.download.progress_interval.is_zero() {
            return Err(config_error(
                "progress_interval must be greater than zero",
                "download.progress_interval",
            ));
        }
        if self.download.format.is_lossy() && self.download.bitrate_kbps == 0 {
            return Err(config_error(
                "bitrate_kbps must be greater than zero for lossy formats",
                "download.bitrate_kbps",
            ));
        }
        if self.download.format_preference.trim().is_empty() {
            return Err(config_error(
                "format_preference must not be empty",
                "download.format_preference",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("mp3-dl")
}

fn default_bitrate() -> u32 {
    192
}

fn default_format_preference() -> String {
    "bestaudio/best".to_string()
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_sleep_min() -> Duration {
    Duration::from_secs(5)
}

fn default_sleep_max() -> Duration {
    Duration::from_secs(15)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_headers() -> BTreeMap<String, String> {
    [
        (
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/100.0.4896.88 Safari/537.36",
        ),
        ("Accept-Language", "en-US,en;q=0.9"),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("Connection", "keep-alive"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
