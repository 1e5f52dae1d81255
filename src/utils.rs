//! Utility functions for file naming and human-readable formatting

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest file stem produced by [`sanitize_file_stem`], in characters
const MAX_STEM_CHARS: usize = 180;

/// Stem used when a title sanitizes to nothing
const FALLBACK_STEM: &str = "audio";

/// Turn a media title into a file stem that is valid on every common filesystem
///
/// Path separators, reserved characters and control characters become `_`,
/// whitespace runs collapse to a single space, and leading/trailing dots and
/// spaces are stripped.
///
/// ```
/// use mp3_dl::utils::sanitize_file_stem;
///
/// assert_eq!(sanitize_file_stem("AC/DC: Back in Black?"), "AC_DC_ Back in Black_");
/// assert_eq!(sanitize_file_stem("..."), "audio");
/// ```
#[must_use]
pub fn sanitize_file_stem(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_space = false;
    for c in title.chars() {
        let c = match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\' => '_',
            c if c.is_whitespace() => ' ',
            c if c.is_control() => '_',
            c => c,
        };
        if c == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        out.push(c);
    }

    let trimmed: String = out
        .trim_matches(|c| c == '.' || c == ' ')
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    let trimmed = trimmed.trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Get a path that does not exist yet, appending ` (1)`, ` (2)`, ... to the stem
///
/// Returns `path` unchanged when nothing exists there.
///
/// ```no_run
/// use mp3_dl::utils::get_unique_path;
/// use std::path::Path;
///
/// let unique = get_unique_path(Path::new("/music/song.mp3")).unwrap();
/// // If /music/song.mp3 exists, returns /music/song (1).mp3
/// ```
pub fn get_unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem from {}", path.display())))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!("cannot extract parent directory of {}", path.display()))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(Error::Other(format!(
        "could not find a free file name for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Format a byte count with binary units (`1.50 MiB`)
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Format a duration as `1h02m03s`, `2m05s` or `7s`
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
