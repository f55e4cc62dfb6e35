//! Storage retry with exponential backoff.
//!
//! Serialization failures (two transactions racing on the same rows, a busy
//! database) are transient: the losing transaction rolled back and can simply
//! run again. They are retried a bounded number of times with doubling,
//! jittered backoff; everything else is returned to the caller immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Default retry attempts after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default first backoff.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(10);

/// Default backoff cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Retry budget for one storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying).
    pub max_retries: u32,
    /// Backoff before the first retry; doubled for each further retry.
    pub base_backoff: Duration,
    /// Upper bound for a single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    ///
    /// `base * 2^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Retry an async operation with exponential backoff.
///
/// The operation runs once, then up to `policy.max_retries` more times while
/// `is_retryable` accepts the error. Each sleep is the policy backoff plus up
/// to 50% random jitter, so racing callers do not retry in lockstep.
///
/// # Returns
///
/// The first success, the first non-retryable error, or the last error once
/// the budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }

                let backoff = with_jitter(policy.backoff(attempt));
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "storage conflict, retrying: {}",
                    err
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

fn with_jitter(backoff: Duration) -> Duration {
    let half = backoff.as_micros() as u64 / 2;
    if half == 0 {
        return backoff;
    }
    backoff + Duration::from_micros(rand::thread_rng().gen_range(0..=half))
}
