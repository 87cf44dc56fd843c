use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Adds up to 50% random spread to each delay.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must not be below base_delay_ms".to_string());
        }
        Ok(())
    }

    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay_ms = (self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter && delay_ms > 0.0 {
            let spread = rand::thread_rng().gen_range(0.0..=0.5);
            (delay_ms * (1.0 + spread)).min(self.max_delay_ms as f64)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or `max_attempts` is used up. The operation receives the 1-based
/// attempt number.
pub async fn retry_with_backoff<F, T, Fut, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    info!("Operation {} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                warn!("Operation {} failed with non-retryable error: {}", operation_name, e);
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                error!(
                    "Operation {} failed after {} attempts: {}",
                    operation_name, attempt, e
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt);
                warn!(
                    "Operation {} failed on attempt {}: {} (retrying in {:?})",
                    operation_name, attempt, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
