// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with fixed or exponential backoff.
//!
//! Coordinator registration is the one call in the worker that retries until
//! it succeeds. The policy is injected so tests can bound it.
//!
//! # Example
//!
//! ```
//! use cache_worker::RetryConfig;
//! use std::time::Duration;
//!
//! // Registration: never give up, one attempt per second
//! let registration = RetryConfig::registration();
//! assert_eq!(registration.max_retries, None);
//! assert_eq!(registration.initial_delay, Duration::from_secs(1));
//!
//! // Bounded fixed-delay policy (what tests inject)
//! let bounded = RetryConfig::fixed(Duration::from_millis(1), Some(3));
//! assert_eq!(bounded.max_retries, Some(3));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::registration()`] - Infinite fixed-delay retry for startup registration
/// - [`RetryConfig::fixed()`] - Fixed delay with an optional attempt bound
/// - [`RetryConfig::reconnect()`] - Exponential backoff for reconnecting a dropped link
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::registration()
    }
}

impl RetryConfig {
    /// Infinite retry with a fixed one second delay.
    /// Registration is a startup precondition, so the worker waits for the
    /// coordinator as long as it takes.
    #[must_use]
    pub fn registration() -> Self {
        Self::fixed(Duration::from_secs(1), None)
    }

    /// Fixed delay between attempts, `max_retries` attempts in total (None = forever).
    #[must_use]
    pub fn fixed(delay: Duration, max_retries: Option<usize>) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
            max_retries,
        }
    }

    /// Exponential backoff capped at 30 seconds, 5 attempts.
    #[must_use]
    pub fn reconnect() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
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

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// Returns the last error when the attempt bound is reached.
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
    let mut delay = config.initial_delay;
    let mut attempts = 0;

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

                match config.max_retries {
                    Some(max) if attempts >= max => return Err(err),
                    Some(max) => warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    ),
                }

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || async { Ok(42) },
        ).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(TestError(format!("fail {}", count)))
                    } else {
                        Ok(42)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let config = RetryConfig::fixed(Duration::from_millis(1), Some(4));

        let result: Result<i32, TestError> = retry(
            "test_op",
            &config,
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError("coordinator down".to_string()))
                }
            },
        ).await;

        assert!(result.unwrap_err().0.contains("coordinator down"));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_retry_keeps_going() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        // Succeeds on the 20th attempt; paused time makes the 1s sleeps instant.
        let result: Result<usize, TestError> = retry(
            "register",
            &RetryConfig::registration(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 20 {
                        Err(TestError("refused".into()))
                    } else {
                        Ok(count)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 20);
    }

    #[test]
    fn test_retry_config_presets() {
        let registration = RetryConfig::registration();
        assert!(registration.max_retries.is_none());
        assert_eq!(registration.factor, 1.0);

        let reconnect = RetryConfig::reconnect();
        assert_eq!(reconnect.max_retries, Some(5));

        assert_eq!(RetryConfig::default(), RetryConfig::registration());
    }

    #[test]
    fn test_fixed_delay_does_not_grow() {
        let config = RetryConfig::fixed(Duration::from_secs(1), None);
        let delay = config.next_delay(config.initial_delay);
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 10.0,
            max_retries: Some(5),
        };

        assert_eq!(config.next_delay(config.initial_delay), Duration::from_secs(5));
    }
}
