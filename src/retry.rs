//! Bounded per-item retry with exponential backoff
//!
//! One item's whole resolve+fetch sequence is retried as a unit. A single failure
//! counter is kept per item and incremented on every failure, whatever its cause.
//! Once the counter exceeds [`RetryConfig::max_retries`] the last error is wrapped in
//! [`Error::RetryExhausted`], which is fatal for the whole job.
//!
//! # Example
//!
//! ```no_run
//! use album_backup::config::RetryConfig;
//! use album_backup::retry::retry_item;
//! use album_backup::types::ItemReference;
//!
//! # async fn example() -> album_backup::Result<()> {
//! let config = RetryConfig::default();
//! let reference = ItemReference::new("/photo-1");
//! let value = retry_item(&config, &reference, |_, _| {}, || async {
//!     // resolve + fetch here
//!     Ok::<_, album_backup::Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, ResolveError, Result};
use crate::types::ItemReference;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the operation that produced this error should be attempted again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Derived from the reference itself; no attempt can succeed
            Error::Resolve(ResolveError::UnsafeReference { .. }) => false,
            // Anything that can go wrong while processing one item is retried: the
            // locator is re-resolved on the next attempt, so even parse failures and
            // 4xx answers may clear up.
            Error::Listing(_)
            | Error::Resolve(_)
            | Error::Fetch(_)
            | Error::Io(_)
            | Error::Network(_)
            | Error::Serialization(_) => true,
            // Already the outcome of a retry loop
            Error::RetryExhausted { .. } => false,
            // Cancellation must stop immediately
            Error::ShuttingDown => false,
            // Config and ledger errors are permanent
            Error::Config { .. } => false,
            Error::Ledger(_) => false,
        }
    }
}

/// Run one item's operation with bounded retry
///
/// # Arguments
///
/// * `config` - Retry configuration (retry count, delays, backoff multiplier, jitter)
/// * `reference` - Item being processed, recorded in the exhaustion error
/// * `on_retry` - Called with the failure count and error before each retry
/// * `operation` - Async closure performing one complete attempt
///
/// # Returns
///
/// The successful result, the first non-retryable error unchanged, or
/// [`Error::RetryExhausted`] after `1 + max_retries` failed attempts.
pub async fn retry_item<F, Fut, T, R>(
    config: &RetryConfig,
    reference: &ItemReference,
    mut on_retry: R,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &Error),
{
    let mut failures: u32 = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if failures > 0 {
                    tracing::info!(
                        reference = %reference,
                        attempts = failures + 1,
                        "Item succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(
                    reference = %reference,
                    error = %e,
                    "Item failed with non-retryable error"
                );
                return Err(e);
            }
            Err(e) => {
                failures += 1;

                if failures > config.max_retries {
                    tracing::error!(
                        reference = %reference,
                        error = %e,
                        attempts = failures,
                        "Item failed after all retry attempts exhausted"
                    );
                    return Err(Error::RetryExhausted {
                        reference: reference.clone(),
                        attempts: failures,
                        source: Box::new(e),
                    });
                }

                tracing::warn!(
                    reference = %reference,
                    error = %e,
                    attempt = failures,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "Item attempt failed, retrying"
                );
                on_retry(failures, &e);

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the result
/// lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
