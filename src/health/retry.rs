use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Delay growth between consecutive failed attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay after every failure
    Fixed,
    /// delay * 2^failures, capped
    Exponential { max_delay: Duration },
}

impl Backoff {
    /// Delay to wait after the given number of failures (1-based)
    pub fn delay_after(&self, base: Duration, failures: u32) -> Duration {
        match self {
            Backoff::Fixed => base,
            Backoff::Exponential { max_delay } => {
                let factor = 2_u32.saturating_pow(failures.saturating_sub(1));
                base.saturating_mul(factor).min(*max_delay)
            }
        }
    }
}

/// Bounded retry policy shared by every network call in the pipeline
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause after a failed attempt
    pub delay: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempt_timeout,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Worst-case wall time for one retried call
    pub fn budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = self.attempt_timeout.saturating_mul(attempts);
        for failures in 1..attempts {
            total += self.backoff.delay_after(self.delay, failures);
        }
        total
    }
}

/// Run `operation` until it succeeds or the policy's attempts are spent.
///
/// The closure receives the 1-based attempt number. Each attempt is bounded by
/// `attempt_timeout`; a timed-out attempt is reported through `on_timeout`.
/// Returns the last error when every attempt fails.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
    on_timeout: impl Fn() -> E,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation(attempt)).await
        {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if attempt >= max_attempts {
                    tracing::debug!(
                        operation = what,
                        attempt,
                        error = %error,
                        "Giving up after final attempt"
                    );
                    return Err(error);
                }

                let delay = policy.backoff.delay_after(policy.delay, attempt);
                tracing::debug!(
                    operation = what,
                    attempt,
                    max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying after delay"
                );
                sleep(delay).await;
            }
        }
    }
}
