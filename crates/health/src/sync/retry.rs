//! Bounded retry with backoff for one window fetch

use std::thread;
use std::time::Duration;

use crate::error::FetchError;

/// Something that can wait
///
/// Returns `false` when the wait was cut short by a stop request.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> bool;
}

/// Plain `thread::sleep`, never interrupted
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        thread::sleep(duration);
        true
    }
}

/// How a single window ended up
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome<T> {
    Fetched { value: T, attempts: u32 },
    /// Nothing recorded for the window
    NoData,
    /// Retryable failures up to the bound; the window is lost
    Exhausted { attempts: u32, last_error: FetchError },
    /// The metric's scope was refused; stop the metric
    Forbidden(String),
    /// The credential was rejected; stop the run
    Unauthorized(String),
    /// A stop request interrupted the backoff wait
    Interrupted { attempts: u32 },
}

impl<T> WindowOutcome<T> {
    /// Outcome of a failure that is not worth retrying
    fn terminal(error: FetchError, attempts: u32) -> Self {
        match error {
            FetchError::NoData => Self::NoData,
            FetchError::ScopeForbidden(message) => Self::Forbidden(message),
            FetchError::Auth(message) => Self::Unauthorized(message),
            last_error => Self::Exhausted {
                attempts,
                last_error,
            },
        }
    }
}

/// Retry limits and delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per window, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wait after a rate limit when the server gives no hint
    pub rate_limit_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            rate_limit_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Exponential delay before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Wait before retrying after `error` on attempt `attempt`
    pub fn delay_for(&self, error: &FetchError, attempt: u32) -> Duration {
        match error {
            FetchError::RateLimited {
                retry_after: Some(hint),
            } => (*hint).min(self.max_delay),
            FetchError::RateLimited { retry_after: None } => self.rate_limit_delay,
            _ => self.backoff(attempt) + self.jitter(),
        }
    }

    /// Run `attempt` until it succeeds, hits a terminal failure or the bound
    pub fn execute<T>(
        &self,
        sleeper: &dyn Sleeper,
        attempt: impl FnMut(u32) -> Result<T, FetchError>,
    ) -> WindowOutcome<T> {
        self.execute_observed(sleeper, attempt, |_, _, _| {})
    }

    /// Like [`execute`](Self::execute), reporting each retry before the wait
    pub fn execute_observed<T>(
        &self,
        sleeper: &dyn Sleeper,
        mut attempt: impl FnMut(u32) -> Result<T, FetchError>,
        mut on_retry: impl FnMut(u32, &FetchError, Duration),
    ) -> WindowOutcome<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut n = 0;

        loop {
            n += 1;
            let error = match attempt(n) {
                Ok(value) => return WindowOutcome::Fetched { value, attempts: n },
                Err(error) if !error.is_retryable() => return WindowOutcome::terminal(error, n),
                Err(error) => error,
            };

            if n >= max_attempts {
                return WindowOutcome::Exhausted {
                    attempts: n,
                    last_error: error,
                };
            }

            let delay = self.delay_for(&error, n);
            on_retry(n, &error, delay);
            if !sleeper.sleep(delay) {
                return WindowOutcome::Interrupted { attempts: n };
            }
        }
    }

    fn jitter(&self) -> Duration {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let hasher = RandomState::new().build_hasher();
        Duration::from_millis(hasher.finish() % (bound + 1))
    }
}
