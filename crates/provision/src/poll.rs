//! Operation Poller - waits for long-running operations.
//!
//! State machine: `PENDING -> DONE(success)`, `PENDING -> DONE(failure)` or
//! `PENDING -> TIMEOUT`. The poller reads status at a fixed interval until
//! the operation is done or the deadline passes. It only talks to a
//! [`Clock`], so the wait can be driven by virtual time in tests or moved
//! onto an event loop without changing what callers observe.
//!
//! Stopping the wait (timeout or cancellation) does not stop the remote
//! operation; callers must not assume it failed.

use crate::classify::Patterns;
use crate::context::{Context, Reporter};
use crate::driver::OperationSource;
use crate::error::{Error, Result};
use crate::retry::{self, RetryConfig};
use crate::types::{OperationHandle, OperationReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Default time between status reads.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for an operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long and how often to poll.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// Retry policy for a single status read
    pub read_retry: RetryConfig,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            read_retry: RetryConfig::no_retry(),
        }
    }
}

/// Shared flag that tells a wait to stop early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Source of monotonic time and of waiting.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Wait for `duration`. Returns `false` if the token was cancelled
    /// before the full duration elapsed.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Wall-clock implementation; sleeps in short slices to notice cancellation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    const SLICE: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Self::SLICE));
        }
    }
}

/// Everything a wait needs, borrowed from the caller.
pub struct Poller<'a> {
    pub config: &'a WaitConfig,
    pub clock: &'a dyn Clock,
    pub cancel: &'a CancelToken,
    pub patterns: &'a Patterns,
    pub reporter: &'a dyn Reporter,
}

impl Poller<'_> {
    /// Wait for an operation to finish.
    ///
    /// Succeeds with the operation's warnings when it finishes without an
    /// error; fails with [`Error::Operation`] when it finishes with one, and
    /// with [`Error::Timeout`] when the deadline passes while still pending.
    pub fn wait(
        &self,
        ctx: &Context,
        source: &dyn OperationSource,
        handle: &OperationHandle,
    ) -> Result<OperationReport> {
        let start = self.clock.now();
        let mut polls = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    operation: handle.to_string(),
                });
            }

            let status = retry::with_retry(
                &self.config.read_retry,
                self.patterns,
                |delay| {
                    if self.clock.sleep(delay, self.cancel) {
                        Ok(())
                    } else {
                        Err(Error::Cancelled {
                            operation: handle.to_string(),
                        })
                    }
                },
                || source.status(ctx, handle),
            )
            .map_err(|e| match e {
                Error::Cancelled { .. } => e,
                e => Error::StatusRead {
                    operation: handle.to_string(),
                    source: Box::new(e),
                },
            })?;
            polls += 1;

            if status.is_done() {
                for warning in &status.warnings {
                    self.reporter.on_warning(handle, warning);
                }
                return match status.error {
                    Some(failure) => Err(Error::Operation {
                        operation: handle.to_string(),
                        failure,
                        warnings: status.warnings,
                    }),
                    None => Ok(OperationReport {
                        warnings: status.warnings,
                        polls,
                    }),
                };
            }

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= self.config.timeout {
                return Err(Error::Timeout {
                    operation: handle.to_string(),
                    waited: elapsed,
                });
            }

            self.reporter.on_poll(handle, polls, elapsed);
            let nap = self.config.interval.min(self.config.timeout - elapsed);
            if !self.clock.sleep(nap, self.cancel) {
                return Err(Error::Cancelled {
                    operation: handle.to_string(),
                });
            }
        }
    }
}
