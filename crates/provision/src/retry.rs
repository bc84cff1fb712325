//! Retry with exponential backoff for transient read failures.
//!
//! Only status reads of long-running operations go through here, and only
//! when configured: the default is a single attempt.

use crate::classify::{Patterns, Signal};
use crate::error::{Error, Result};
use std::time::Duration;

/// Retry configuration for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given (0-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.min(16) as i32);
        let delay = self.base_delay.mul_f64(factor.max(0.0));
        delay.min(self.max_delay)
    }
}

/// Whether an error is worth repeating the same read for.
pub fn is_transient(error: &Error, patterns: &Patterns) -> bool {
    error
        .execution()
        .is_some_and(|e| patterns.classify(e) == Signal::Transient)
}

/// Run `operation`, retrying transient failures with backoff.
///
/// `sleep` performs the wait between attempts so callers can route it
/// through their clock. An error from `sleep` ends the retries and is
/// returned as is.
pub fn with_retry<T, F, S>(
    config: &RetryConfig,
    patterns: &Patterns,
    mut sleep: S,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    S: FnMut(Duration) -> Result<()>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt + 1 >= config.max_attempts || !is_transient(&e, patterns) {
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                log::warn!(
                    "attempt {}/{} failed: {e}; retrying in {}ms",
                    attempt + 1,
                    config.max_attempts,
                    delay.as_millis()
                );
                sleep(delay)?;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecutionError, Status};
    use std::cell::Cell;

    fn unavailable() -> Error {
        Error::Execution(ExecutionError {
            command: "GET operations/op-1".into(),
            status: Status::Http(503),
            stderr: "backend unavailable".into(),
        })
    }

    fn denied() -> Error {
        Error::Execution(ExecutionError {
            command: "GET operations/op-1".into(),
            status: Status::Http(403),
            stderr: "permission denied".into(),
        })
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_no_retry_by_default() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(
            &RetryConfig::default(),
            &Patterns::default(),
            |_| Ok(()),
            || {
                attempts.set(attempts.get() + 1);
                Err(unavailable())
            },
        );
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_transient_eventually_succeeds() {
        let attempts = Cell::new(0);
        let slept = Cell::new(Duration::ZERO);
        let result = with_retry(
            &fast(3),
            &Patterns::default(),
            |d| {
                slept.set(slept.get() + d);
                Ok(())
            },
            || {
                let n = attempts.get();
                attempts.set(n + 1);
                if n < 2 { Err(unavailable()) } else { Ok(7) }
            },
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.get(), 3);
        // 1ms then 2ms
        assert_eq!(slept.get(), Duration::from_millis(3));
    }

    #[test]
    fn test_non_transient_is_not_retried() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&fast(5), &Patterns::default(), |_| Ok(()), || {
            attempts.set(attempts.get() + 1);
            Err(denied())
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_failed_sleep_stops_retrying() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(
            &fast(5),
            &Patterns::default(),
            |_| Err(Error::Other("interrupted".into())),
            || {
                attempts.set(attempts.get() + 1);
                Err(unavailable())
            },
        );
        assert!(matches!(result, Err(Error::Other(ref m)) if m == "interrupted"));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let config = fast(10);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(8));
        assert_eq!(config.delay_for_attempt(9), Duration::from_millis(10));
    }
}
