//! Retry With Exponential Backoff
//!
//! Shared by the annotation client and the table sink writer.
//! Delay for attempt `n` (0-based) is `base_delay * 2^n`, capped at `max_delay`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Retry Policy
// =============================================================================

/// Backoff configuration for retried operations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, 0, 0)
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

// =============================================================================
// Retry Execution
// =============================================================================

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Last error observed
    pub error: E,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Whether the last error was retryable (false = gave up early)
    pub retryable: bool,
}

/// Runs `f` until it succeeds, returns a non-retryable error, or the policy
/// is exhausted.
pub async fn execute_with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: R,
    mut f: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let retryable = is_retryable(&e);
                if !retryable || attempt >= policy.max_retries {
                    return Err(RetryExhausted {
                        error: e,
                        attempts: attempt + 1,
                        retryable,
                    });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "{} attempt {} failed, retrying in {}ms: {}",
                    operation,
                    attempt + 1,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
