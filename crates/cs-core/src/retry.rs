//! Retry with capped exponential backoff
//!
//! One ladder for every retrying call site: bus nak delays, playbook
//! step retries, and transient backend failures in the index build.
//! Delay for attempt `n` (1-based) is `min(base * factor^(n-1), cap)`.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Backoff parameters. Defaults mirror the bus retry settings
/// (1s base, 2.0 factor, 30s cap, 5 attempts).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base, self.factor, self.cap)
    }
}

/// `min(base * factor^(attempt-1), cap)`, with attempt clamped to >= 1.
pub fn backoff_delay(attempt: u32, base: Duration, factor: f64, cap: Duration) -> Duration {
    let exp = attempt.max(1) - 1;
    let scaled = base.as_secs_f64() * factor.powi(exp as i32);
    let capped = scaled.min(cap.as_secs_f64());
    Duration::from_secs_f64(capped)
}

/// Run `op` until it succeeds or the policy's attempts are exhausted,
/// sleeping the backoff delay between failures. The final error is
/// returned unchanged.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{label}: attempt {attempt}/{} failed ({err}), retrying in {:.1}s",
                    policy.attempts,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
