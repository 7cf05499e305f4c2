// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! [`RetryConfig`] describes a backoff schedule. The offline queue uses
//! [`RetryConfig::delay_for`] to space out replays of one operation; the
//! [`retry`] helper wraps one-shot async calls such as opening the queue
//! journal.
//!
//! # Example
//!
//! ```
//! use pos_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let queue = RetryConfig::offline_queue(Duration::from_secs(2), 3);
//! assert_eq!(queue.delay_for(1), Duration::from_secs(2));
//! assert_eq!(queue.delay_for(2), Duration::from_secs(4));
//! assert_eq!(queue.delay_for(3), Duration::from_secs(8));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::offline_queue(Duration::from_secs(2), 3)
    }
}

impl RetryConfig {
    /// Replay schedule for the offline queue: `base * 2^(n-1)`.
    #[must_use]
    pub fn offline_queue(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay: base_delay,
            max_delay: Duration::from_secs(3600),
            factor: 2.0,
            max_retries: Some(max_retries),
        }
    }

    /// Fast-fail retry for opening local resources at startup.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before the next attempt after `retry_count` failures (1-based).
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(63) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.factor.powi(exp);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    /// Whether `retry_count` failures use up the budget. `max_retries`
    /// counts retries after the first attempt, so an operation gets at most
    /// `max_retries + 1` attempts.
    #[must_use]
    pub fn exhausted(&self, retry_count: u32) -> bool {
        self.max_retries.is_some_and(|max| retry_count > max)
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if config.exhausted(attempts) {
                    return Err(err);
                }

                let delay = config.delay_for(attempts);
                warn!(
                    "Operation '{}' failed (attempt {}): {}. Retrying in {:?}...",
                    operation_name, attempts, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}
