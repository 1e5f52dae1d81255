//! Credential sources: cookie file pools and browser cookie stores
//!
//! The core never reads cookie contents. A source is resolved per job into an
//! opaque [`Credentials`] value that the resolver turns into command-line options.

use crate::error::CredentialError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extension of cookie files in a pool directory
const COOKIE_FILE_EXTENSION: &str = "txt";

/// Browsers whose cookie stores can be handed to the resolver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    /// Mozilla Firefox
    Firefox,
    /// Google Chrome
    Chrome,
    /// Microsoft Edge
    Edge,
    /// Brave
    Brave,
    /// Opera
    Opera,
    /// Apple Safari (macOS only)
    Safari,
}

impl Browser {
    /// Every supported browser, in display order
    pub const ALL: [Browser; 6] = [
        Browser::Firefox,
        Browser::Chrome,
        Browser::Edge,
        Browser::Brave,
        Browser::Opera,
        Browser::Safari,
    ];

    /// Name understood by the resolver
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Firefox => "firefox",
            Browser::Chrome => "chrome",
            Browser::Edge => "edge",
            Browser::Brave => "brave",
            Browser::Opera => "opera",
            Browser::Safari => "safari",
        }
    }

    /// Whether the browser's cookie store can exist on this platform
    pub fn is_available_on_platform(&self) -> bool {
        match self {
            Browser::Safari => cfg!(target_os = "macos"),
            _ => true,
        }
    }
}

impl std::fmt::Display for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Browser {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Browser::ALL
            .into_iter()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| CredentialError::UnsupportedBrowser(s.to_string()))
    }
}

/// Where cookies for a job come from
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CredentialSource {
    /// No credentials
    #[default]
    None,
    /// Pick one `*.txt` cookie file at random from a directory, per job
    CookieFiles {
        /// Pool directory
        dir: PathBuf,
    },
    /// Ask the resolver to read cookies from a browser profile
    Browser {
        /// Browser to read from
        browser: Browser,
    },
    /// Use the browser, falling back to the cookie pool when the browser is unusable
    BrowserWithFallback {
        /// Browser to read from
        browser: Browser,
        /// Pool directory used as fallback
        dir: PathBuf,
    },
}

/// Credentials resolved for one job
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Credentials {
    /// Anonymous access
    #[default]
    None,
    /// Netscape-format cookie file
    CookieFile(PathBuf),
    /// Browser cookie store
    Browser(Browser),
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => f.write_str("no credentials"),
            Credentials::CookieFile(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                write!(f, "cookie file {}", name)
            }
            Credentials::Browser(browser) => write!(f, "{} cookies", browser),
        }
    }
}

/// List the cookie files in a pool directory, sorted by path
pub async fn cookie_pool(dir: &Path) -> Result<Vec<PathBuf>, CredentialError> {
    let unreadable = |e: std::io::Error| CredentialError::PoolUnreadable {
        dir: dir.to_path_buf(),
        reason: e.to_string(),
    };

    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(CredentialError::PoolMissing {
                dir: dir.to_path_buf(),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CredentialError::PoolMissing {
                dir: dir.to_path_buf(),
            });
        }
        Err(e) => return Err(unreadable(e)),
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        let is_cookie_file = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(COOKIE_FILE_EXTENSION));
        // metadata follows symlinks, so linked cookie files count
        if is_cookie_file && tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(CredentialError::PoolEmpty {
            dir: dir.to_path_buf(),
        });
    }
    Ok(files)
}

/// Pick one file uniformly at random; `None` only for an empty pool
pub fn choose_cookie_file<'a, R: Rng + ?Sized>(
    pool: &'a [PathBuf],
    rng: &mut R,
) -> Option<&'a PathBuf> {
    pool.choose(rng)
}

/// Resolves the configured [`CredentialSource`] into per-job [`Credentials`]
#[derive(Clone, Debug, Default)]
pub struct CredentialProvider {
    source: CredentialSource,
}

impl CredentialProvider {
    /// Create a provider for a source
    pub fn new(source: CredentialSource) -> Self {
        Self { source }
    }

    /// The configured source
    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Resolve credentials for one job with a freshly seeded RNG
    pub async fn resolve(&self) -> Result<Credentials, CredentialError> {
        self.resolve_with(&mut StdRng::from_entropy()).await
    }

    /// Resolve credentials for one job with an explicit RNG
    ///
    /// The pool directory is re-read on every call so files added between
    /// jobs are picked up.
    pub async fn resolve_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<Credentials, CredentialError> {
        match &self.source {
            CredentialSource::None => Ok(Credentials::None),
            CredentialSource::CookieFiles { dir } => pick_from_dir(dir, rng).await,
            CredentialSource::Browser { browser } => browser_credentials(*browser),
            CredentialSource::BrowserWithFallback { browser, dir } => {
                match browser_credentials(*browser) {
                    Ok(credentials) => Ok(credentials),
                    Err(e) => {
                        tracing::warn!(
                            browser = %browser,
                            error = %e,
                            "Browser cookies unusable, falling back to cookie pool"
                        );
                        pick_from_dir(dir, rng).await
                    }
                }
            }
        }
    }
}

fn browser_credentials(browser: Browser) -> Result<Credentials, CredentialError> {
    if browser.is_available_on_platform() {
        Ok(Credentials::Browser(browser))
    } else {
        Err(CredentialError::UnsupportedBrowser(format!(
            "{} (not available on this platform)",
            browser
        )))
    }
}

async fn pick_from_dir<R: Rng + ?Sized>(
    dir: &Path,
    rng: &mut R,
) -> Result<Credentials, CredentialError> {
    let pool = cookie_pool(dir).await?;
    choose_cookie_file(&pool, rng)
        .cloned()
        .map(Credentials::CookieFile)
        .ok_or_else(|| CredentialError::PoolEmpty {
            dir: dir.to_path_buf(),
        })
}
