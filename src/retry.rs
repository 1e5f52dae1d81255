//! Retry with exponential backoff
//!
//! Network fetches are wrapped in [`retry_with_notify`], which re-runs the
//! operation while its error is [`IsRetryable`] and the attempt budget lasts.
//! Delays come from [`Backoff`]: `initial_delay * multiplier^n`, optionally
//! stretched by up to 100% jitter, never above `max_delay`.
//!
//! # Example
//!
//! ```no_run
//! use mp3_dl::config::RetryConfig;
//! use mp3_dl::retry::retry_with_notify;
//! use mp3_dl::Error;
//!
//! # async fn example() -> mp3_dl::Result<()> {
//! let config = RetryConfig::default();
//! let body = retry_with_notify(
//!     &config,
//!     || async { Ok::<_, Error>(Vec::<u8>::new()) },
//!     |attempt, err, delay| eprintln!("retry {attempt} in {delay:?}: {err}"),
//! )
//! .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

/// Classifies failures as transient (worth another attempt) or permanent
pub trait IsRetryable {
    /// True for timeouts, resets, 5xx and throttling responses
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_body() || e.is_request(),
            Error::Http { status, .. } => {
                matches!(*status, 408 | 425 | 429) || (500..=599).contains(status)
            }
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::Interrupted
                    | ErrorKind::UnexpectedEof
            ),
            Error::Resolver(_)
            | Error::Transcode(_)
            | Error::Credential(_)
            | Error::InvalidInput(_)
            | Error::Config { .. }
            | Error::Batch(_)
            | Error::Serialization(_)
            | Error::ExternalTool(_)
            | Error::Other(_) => false,
        }
    }
}

/// Delay schedule for one retried operation
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a schedule at `config.initial_delay`
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: config.initial_delay.min(config.max_delay),
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = if self.jitter {
            let stretch: f64 = rng.gen_range(0.0..=1.0);
            self.scaled(self.base, 1.0 + stretch)
        } else {
            self.base
        };
        self.base = self.scaled(self.base, self.multiplier);
        delay
    }

    /// `delay * factor`, capped at `max`; overflow and non-finite factors saturate to `max`
    fn scaled(&self, delay: Duration, factor: f64) -> Duration {
        let secs = delay.as_secs_f64() * factor;
        if secs.is_nan() {
            return self.max;
        }
        Duration::try_from_secs_f64(secs.min(self.max.as_secs_f64())).unwrap_or(self.max)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries
///
/// `on_retry(attempt, &error, delay)` is called once per retry with a 1-based
/// attempt number, before the backoff sleep. `max_attempts` counts retries, so
/// the operation runs at most `max_attempts + 1` times.
pub async fn retry_with_notify<F, Fut, T, E, N>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    N: FnMut(u32, &E, Duration),
{
    let mut backoff = Backoff::new(config);
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(retries = attempt, "Recovered after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::debug!(error = %err, "Permanent failure, not retrying");
            return Err(err);
        }
        if attempt >= config.max_attempts {
            tracing::warn!(error = %err, retries = attempt, "Retry budget exhausted");
            return Err(err);
        }

        attempt += 1;
        let delay = backoff.next_delay(&mut rand::thread_rng());
        tracing::warn!(
            error = %err,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        on_retry(attempt, &err, delay);
        tokio::time::sleep(delay).await;
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranscodeError;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    enum Flaky {
        Blip,
        Fatal,
    }

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(match self {
                Flaky::Blip => "blip",
                Flaky::Fatal => "fatal",
            })
        }
    }

    impl IsRetryable for Flaky {
        fn is_retryable(&self) -> bool {
            *self == Flaky::Blip
        }
    }

    fn config(max_attempts: u32, jitter: bool) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter,
        }
    }

    /// Fails with each error in `script`, then succeeds with the call count
    async fn run_script(cfg: &RetryConfig, script: &[Flaky]) -> (Result<usize, Flaky>, Vec<u32>) {
        let calls = Cell::new(0usize);
        let mut retries = Vec::new();
        let result = retry_with_notify(
            cfg,
            || {
                let n = calls.get();
                calls.set(n + 1);
                let outcome = match script.get(n) {
                    Some(Flaky::Blip) => Err(Flaky::Blip),
                    Some(Flaky::Fatal) => Err(Flaky::Fatal),
                    None => Ok(n + 1),
                };
                async move { outcome }
            },
            |attempt, _, _| retries.push(attempt),
        )
        .await;
        (result, retries)
    }

    #[tokio::test]
    async fn test_first_try_success_never_notifies() {
        let (result, retries) = run_script(&config(3, false), &[]).await;
        assert_eq!(result, Ok(1));
        assert!(retries.is_empty());
    }

    #[tokio::test]
    async fn test_two_blips_then_success() {
        let (result, retries) = run_script(&config(3, true), &[Flaky::Blip, Flaky::Blip]).await;
        assert_eq!(result, Ok(3));
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_budget_counts_retries_not_calls() {
        let script = [Flaky::Blip, Flaky::Blip, Flaky::Blip, Flaky::Blip];
        let (result, retries) = run_script(&config(2, false), &script).await;
        assert_eq!(result, Err(Flaky::Blip));
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let (result, retries) = run_script(&config(5, false), &[Flaky::Blip, Flaky::Fatal]).await;
        assert_eq!(result, Err(Flaky::Fatal));
        assert_eq!(retries, vec![1]);
    }

    #[tokio::test]
    async fn test_zero_budget_surfaces_first_blip() {
        let (result, retries) = run_script(&config(0, false), &[Flaky::Blip]).await;
        assert_eq!(result, Err(Flaky::Blip));
        assert!(retries.is_empty());
    }

    #[tokio::test]
    async fn test_notified_delays_follow_schedule() {
        let cfg = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(30),
            backoff_multiplier: 3.0,
            jitter: false,
        };
        let mut delays = Vec::new();
        let _ = retry_with_notify(
            &cfg,
            || async { Err::<(), _>(Flaky::Blip) },
            |_, _, delay| delays.push(delay.as_millis()),
        )
        .await;
        assert_eq!(delays, vec![5, 15, 30, 30]);
    }

    #[test]
    fn test_backoff_without_jitter_is_deterministic() {
        let mut backoff = Backoff::new(&RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        });
        let mut rng = StdRng::seed_from_u64(1);
        let secs: Vec<u64> = (0..5).map(|_| backoff.next_delay(&mut rng).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 10]);
    }

    #[test]
    fn test_jitter_stays_between_base_and_cap() {
        let cfg = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
            backoff_multiplier: 1.0,
            jitter: true,
        };
        let mut backoff = Backoff::new(&cfg);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let delay = backoff.next_delay(&mut rng);
            assert!(delay >= Duration::from_millis(100), "{delay:?}");
            assert!(delay <= Duration::from_millis(150), "{delay:?}");
        }
    }

    #[test]
    fn test_initial_delay_above_cap_is_clamped() {
        let mut cfg = config(1, false);
        cfg.initial_delay = Duration::from_secs(60);
        let mut backoff = Backoff::new(&cfg);
        assert_eq!(
            backoff.next_delay(&mut StdRng::seed_from_u64(0)),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_extreme_multipliers_saturate_at_cap() {
        for multiplier in [1e300, f64::INFINITY, f64::NAN] {
            let mut backoff = Backoff::new(&RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                backoff_multiplier: multiplier,
                jitter: true,
            });
            let mut rng = StdRng::seed_from_u64(3);
            let first = backoff.next_delay(&mut rng);
            assert!(first >= Duration::from_secs(1) && first <= Duration::from_secs(2));
            assert_eq!(backoff.next_delay(&mut rng), Duration::from_secs(30), "{multiplier}");
            assert_eq!(backoff.next_delay(&mut rng), Duration::from_secs(30), "{multiplier}");
        }
    }

    #[tokio::test]
    async fn test_huge_multiplier_retries_without_panicking() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1e300,
            jitter: true,
        };
        let (result, retries) = run_script(&cfg, &[Flaky::Blip, Flaky::Blip, Flaky::Blip]).await;
        assert_eq!(result, Ok(4));
        assert_eq!(retries, vec![1, 2, 3]);
    }

    #[test]
    fn test_io_kinds() {
        let io = |kind| Error::Io(std::io::Error::new(kind, "io"));
        for kind in [
            ErrorKind::TimedOut,
            ErrorKind::ConnectionReset,
            ErrorKind::BrokenPipe,
            ErrorKind::UnexpectedEof,
        ] {
            assert!(io(kind).is_retryable(), "{kind:?}");
        }
        for kind in [ErrorKind::NotFound, ErrorKind::PermissionDenied, ErrorKind::StorageFull] {
            assert!(!io(kind).is_retryable(), "{kind:?}");
        }
    }

    #[test]
    fn test_http_statuses() {
        let http = |status| Error::Http {
            status,
            url: "https://cdn.example/x".to_string(),
        };
        for status in [408, 429, 500, 502, 503] {
            assert!(http(status).is_retryable(), "{status}");
        }
        for status in [400, 403, 404, 410] {
            assert!(!http(status).is_retryable(), "{status}");
        }
    }

    #[test]
    fn test_resolver_and_encoder_failures_are_permanent() {
        assert!(!Error::Resolver("Video unavailable".to_string()).is_retryable());
        assert!(
            !Error::Transcode(TranscodeError::ToolNotFound {
                tool: "ffmpeg".to_string()
            })
            .is_retryable()
        );
        assert!(!Error::ExternalTool("yt-dlp missing".to_string()).is_retryable());
        assert!(!Error::InvalidInput("empty URL".to_string()).is_retryable());
    }
}
