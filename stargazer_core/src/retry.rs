//! Retry with exponential backoff.
//!
//! Used for a Compute node's self-registration and for remote token
//! validation. Per-step calls are never retried; a missed step deadline
//! demotes the node instead.
//!
//! - `delay = initial_delay_ms * multiplier^(attempt-1)`, clamped to
//!   `max_delay_ms`
//! - Deterministic jitter: `(attempt * 7919 + 104729) % (delay/4 + 1)`
//! - Only [`crate::error::StargazerError::is_transient`] errors are retried
//! - Sleeps go through the context so simulated runs stay on virtual time

use stargazer_env::StargazerContext;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

/// Configuration for retry-with-backoff behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay (milliseconds)
    pub max_delay_ms: u64,
    /// Factor applied per attempt
    pub backoff_multiplier: f64,
    /// Whether to add deterministic jitter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Delay in milliseconds before retry number `attempt` (1-indexed).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let base = (config.initial_delay_ms as f64) * config.backoff_multiplier.powi(exponent as i32);

    // Clamp handles NaN, Inf and negatives
    let max = config.max_delay_ms as f64;
    let mut delay = if base.is_nan() || base < 0.0 {
        0
    } else if base > max {
        config.max_delay_ms
    } else {
        base as u64
    };

    if config.jitter {
        let quarter = delay / 4;
        if quarter > 0 {
            let jitter = (u64::from(attempt).wrapping_mul(7919).wrapping_add(104729)) % (quarter + 1);
            delay = delay.saturating_add(jitter).min(config.max_delay_ms);
        }
    }

    delay
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// runs out of attempts. Returns the last error in the latter two cases.
pub async fn retry_with_backoff<Ctx, F, Fut, T>(
    context: &Ctx,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T>
where
    Ctx: StargazerContext + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= config.max_attempts.max(1) => return Err(e),
            Err(e) => {
                let delay = compute_delay(config, attempt);
                debug!(attempt, delay_ms = delay, error = %e, "Retrying after transient failure");
                context.sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}
