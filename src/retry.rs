//! Retry logic with exponential backoff
//!
//! Catalog queries and content downloads go through [`with_retry`] so that
//! transport hiccups (timeouts, refused connections, 5xx answers) do not turn
//! into batch failures. Authentication failures and anything the pipeline
//! records per artifact are never retried.
//!
//! # Example
//!
//! ```no_run
//! use offline_servicing::config::RetryConfig;
//! use offline_servicing::retry::with_retry;
//!
//! # async fn example(client: reqwest::Client) -> offline_servicing::Result<()> {
//! let body = with_retry(&RetryConfig::default(), || async {
//!     let response = client.get("https://updates.example.com/index").send().await?;
//!     Ok::<_, offline_servicing::Error>(response.text().await?)
//! })
//! .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{CatalogError, Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (authentication failed, disk full, corrupt data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Catalog(CatalogError::Unavailable { .. }) => true,
            Error::Catalog(_) => false,
            Error::Fetch(FetchError::HttpStatus { status, .. }) => {
                *status >= 500 || *status == 429 || *status == 408
            }
            Error::Fetch(FetchError::Transfer { reason, .. }) => {
                reason.contains("timed out") || reason.contains("connection")
            }
            Error::Fetch(_) => false,
            Error::Apply(_) => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::Serialization(_) => false,
            Error::ExternalTool(_) => false,
            Error::NotSupported(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries
///
/// `max_attempts` counts retries, so the operation runs at most
/// `max_attempts + 1` times. The wait between runs starts at `initial_delay`
/// and grows by `backoff_multiplier` up to `max_delay`.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;
    let mut delay = config.initial_delay;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(retries, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::debug!(error = %err, "Permanent failure, not retrying");
            return Err(err);
        }
        if retries >= config.max_attempts {
            tracing::error!(
                error = %err,
                attempts = retries + 1,
                "Giving up after all retry attempts"
            );
            return Err(err);
        }

        retries += 1;
        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::warn!(
            error = %err,
            retry = retries,
            max_retries = config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "Transient failure, backing off"
        );
        tokio::time::sleep(wait).await;
        delay = next_delay(delay, config);
    }
}

/// Delay before the retry after one that waited `delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    delay.mul_f64(config.backoff_multiplier).min(config.max_delay)
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
