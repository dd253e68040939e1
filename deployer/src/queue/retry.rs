//! Bounded retry with backoff

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::queue::{Backoff, BackoffKind, JobOptions};

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Wait before attempt `attempt` (1-based); nothing before the first
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base = self.backoff.delay();
        match self.backoff.kind {
            BackoffKind::Fixed => base,
            BackoffKind::Exponential => {
                let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }

    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

impl From<&JobOptions> for RetryPolicy {
    fn from(options: &JobOptions) -> Self {
        Self {
            attempts: options.attempts,
            backoff: options.backoff,
        }
    }
}

/// The error of the last attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy's
/// attempts are used up. `op` receives the 1-based attempt number. On success
/// the number of attempts made is returned with the value.
pub async fn retry_with<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut op: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                if attempt >= max_attempts || !is_retryable(&error) {
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                    });
                }
                attempt += 1;
                let delay = policy.delay_before(attempt);
                debug!("Attempt {} of {} in {:?}", attempt, max_attempts, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
