//! Transcode step: external encoder turning a downloaded stream into the target audio format

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::error::TranscodeError;
use crate::types::OutputFormat;
use crate::utils::{get_unique_path, sanitize_file_stem};

const BINARY_NAME: &str = "ffmpeg";

/// Number of stderr lines kept in [`TranscodeError::NonZeroExit`]
const STDERR_TAIL_LINES: usize = 10;

/// Trait for audio encoders
///
/// Success means the encoder exited zero and left a non-empty file at `output`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` into `output`
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: OutputFormat,
        bitrate_kbps: u32,
    ) -> Result<(), TranscodeError>;

    /// Name of the implementation (for logging)
    fn name(&self) -> &'static str;
}

/// ffmpeg-backed transcoder
#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    binary_path: PathBuf,
}

impl FfmpegTranscoder {
    /// Create a transcoder with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    pub fn from_path() -> Option<Self> {
        which::which(BINARY_NAME).ok().map(Self::new)
    }

    /// Build a transcoder from tool configuration
    ///
    /// Never fails: a missing encoder is reported per job as
    /// [`TranscodeError::ToolNotFound`].
    pub fn from_config(tools: &ToolsConfig) -> Self {
        if let Some(path) = &tools.encoder_path {
            return Self::new(path.clone());
        }
        if tools.search_path
            && let Some(transcoder) = Self::from_path()
        {
            return transcoder;
        }
        Self::new(PathBuf::from(BINARY_NAME))
    }

    /// Path of the binary this transcoder runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn build_args(input: &Path, output: &Path, format: OutputFormat, bitrate_kbps: u32) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-vn".into(),
            "-codec:a".into(),
            format.codec().into(),
        ];
        if format.is_lossy() {
            args.push("-b:a".into());
            args.push(format!("{}k", bitrate_kbps).into());
        }
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: OutputFormat,
        bitrate_kbps: u32,
    ) -> Result<(), TranscodeError> {
        let tool = self.binary_path.display().to_string();
        let args = Self::build_args(input, output, format, bitrate_kbps);
        tracing::debug!(tool = %tool, ?args, "Running encoder");

        let result = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await;

        let output_status = match result {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranscodeError::ToolNotFound { tool });
            }
            Err(e) => {
                return Err(TranscodeError::SpawnFailed {
                    tool,
                    reason: e.to_string(),
                });
            }
        };

        if !output_status.status.success() {
            tokio::fs::remove_file(output).await.ok();
            return Err(TranscodeError::NonZeroExit {
                code: output_status.status.code(),
                stderr: stderr_tail(&output_status.stderr),
            });
        }

        verify_output(output).await
    }

    fn name(&self) -> &'static str {
        BINARY_NAME
    }
}

/// Fail with [`TranscodeError::MissingOutput`] unless `output` is a non-empty file
pub async fn verify_output(output: &Path) -> Result<(), TranscodeError> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => {
            tokio::fs::remove_file(output).await.ok();
            Err(TranscodeError::MissingOutput {
                path: output.to_path_buf(),
            })
        }
        Err(_) => Err(TranscodeError::MissingOutput {
            path: output.to_path_buf(),
        }),
    }
}

/// Destination path for a media title, unique within `dest_dir`
pub fn output_path_for(
    dest_dir: &Path,
    title: &str,
    format: OutputFormat,
) -> crate::Result<PathBuf> {
    let file_name = format!("{}.{}", sanitize_file_stem(title), format.extension());
    get_unique_path(&dest_dir.join(file_name))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
