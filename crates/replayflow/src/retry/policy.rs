//! Backoff policies for failed and timed-out tasks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::options::millis;

/// How a failed task is retried.
///
/// Policies are selected from configuration, tagged by `policy`:
///
/// ```
/// use std::time::Duration;
/// use replayflow::RetryPolicy;
///
/// let policy: RetryPolicy = serde_json::from_str(
///     r#"{"policy":"constant_delay","wait_ms":5000,"max_attempts":2}"#,
/// ).unwrap();
///
/// assert_eq!(policy.next_delay(1), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(2), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(3), None);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Never retry.
    #[default]
    NoRetry,

    /// Wait the same time before every retry.
    ConstantDelay {
        /// Delay before each retry, in milliseconds.
        wait_ms: u64,
        /// Number of retries, not counting the first attempt.
        max_attempts: u32,
    },

    /// Wait `base * (2^n - 1)` before retry `n`, capped at `max_wait`.
    Exponential {
        /// Base delay in milliseconds.
        base_ms: u64,
        /// Upper bound on any single delay, in milliseconds.
        max_wait_ms: u64,
        /// Number of retries, not counting the first attempt.
        max_attempts: u32,
    },
}

impl RetryPolicy {
    /// A policy waiting `wait` before each of up to `max_attempts` retries.
    pub fn constant_delay(wait: Duration, max_attempts: u32) -> Self {
        Self::ConstantDelay {
            wait_ms: millis(wait),
            max_attempts,
        }
    }

    /// An exponential policy starting at `base`, capped at `max_wait`.
    pub fn exponential(base: Duration, max_wait: Duration, max_attempts: u32) -> Self {
        Self::Exponential {
            base_ms: millis(base),
            max_wait_ms: millis(max_wait),
            max_attempts,
        }
    }

    /// Returns `false` exactly for [`RetryPolicy::NoRetry`].
    pub fn should_retry(&self) -> bool {
        !matches!(self, RetryPolicy::NoRetry)
    }

    /// Maximum number of retries.
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::NoRetry => 0,
            RetryPolicy::ConstantDelay { max_attempts, .. }
            | RetryPolicy::Exponential { max_attempts, .. } => *max_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` to stop.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts() {
            return None;
        }

        match *self {
            RetryPolicy::NoRetry => None,
            RetryPolicy::ConstantDelay { wait_ms, .. } => Some(Duration::from_millis(wait_ms)),
            RetryPolicy::Exponential {
                base_ms,
                max_wait_ms,
                ..
            } => {
                // Overflow anywhere means the cap has been reached.
                let delay_ms = 2u64
                    .checked_pow(attempt)
                    .map(|factor| factor - 1)
                    .and_then(|factor| base_ms.checked_mul(factor))
                    .unwrap_or(max_wait_ms)
                    .min(max_wait_ms);
                Some(Duration::from_millis(delay_ms))
            }
        }
    }
}
