//! Bounded retry with exponential backoff
//!
//! Every store operation except the expiry sweep runs through [`with_retry`],
//! so all of them share one backoff schedule. The wrapper never looks inside an
//! error: the backend decides what is transient via [`crate::Error::is_transient`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;

/// Retry policy for transient backing-store errors
///
/// The delay before retry `n` (1-indexed) is
/// `min(min_delay * 2^(n-1), max_delay)`.
///
/// # Example
/// ```
/// use sqlsession_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for(1), Duration::from_millis(50));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(6), Duration::from_millis(1000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set the number of retries after the first attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry
    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the upper bound for a single delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Total number of times a statement may be executed
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `retry` (1-indexed; 0 is treated as 1)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self
            .min_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

/// Run `operation` until it succeeds, fails terminally, or the policy's retry
/// budget is spent. Only the final outcome is returned.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut work: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries: u32 = 0;

    loop {
        match work().await {
            Ok(value) => {
                if retries > 0 {
                    debug!(operation, retries, "Operation succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(
                    operation,
                    attempt = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        operation,
                        attempts = retries + 1,
                        error = %e,
                        "Retry budget exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}
