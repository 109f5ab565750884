use rand::Rng;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    // Linear backoff plus random jitter in [0, base_delay).
    fn delay_for(&self, attempt: u32) -> Duration {
        let base_millis = self.base_delay.as_millis() as u64;
        if base_millis == 0 {
            return Duration::ZERO;
        }
        let jitter = rand::rng().random_range(0..base_millis);
        Duration::from_millis(
            base_millis
                .saturating_mul(u64::from(attempt))
                .saturating_add(jitter),
        )
    }
}

/// Runs `operation` until it succeeds or the policy's attempts are exhausted.
pub async fn retry_with_delay<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.attempts => return Err(err),
            Err(err) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "Attempt {}/{} failed: {} (retry in {}ms)",
                    attempt,
                    policy.attempts,
                    err,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
