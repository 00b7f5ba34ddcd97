//! Exponential backoff for infrastructure failures

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::StorageConfig;

/// Retry policy for calls against shared storage
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_retries: config.retry_max_attempts,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), with up to 10% jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = (exp.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return exp;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        exp.saturating_add(Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or retries run out
pub async fn with_backoff<T, E, F, Fut, R>(
    policy: RetryPolicy,
    operation: &str,
    is_retryable: R,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                warn!(
                    operation = %operation,
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
