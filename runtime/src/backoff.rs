//! Exponential backoff for transient broker failures.
//!
//! Two consumers use it: the event read loop, which waits a growing delay
//! after consecutive read errors and never gives up, and process start-up,
//! which retries topic creation a bounded number of times while the broker
//! comes up.
//!
//! # Example
//!
//! ```rust
//! use tracemesh_runtime::backoff::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::new(Duration::from_millis(100)).max_delay(Duration::from_secs(1));
//! assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(1));
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Capped exponential delay schedule.
///
/// # Default Values
///
/// - `initial_delay`: 100ms
/// - `max_delay`: 5 seconds
/// - `multiplier`: 2 (delay doubles each attempt)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Backoff {
    /// Schedule starting at `initial_delay`.
    #[must_use]
    pub const fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(5),
            multiplier: 2,
        }
    }

    /// Cap every delay at `max_delay`.
    #[must_use]
    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Growth factor between attempts; `1` gives a constant delay.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// First delay of the schedule.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Delay before retry number `attempt` (zero-based):
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.multiplier
            .checked_pow(attempt)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Run `operation` until it succeeds or `max_attempts` calls have failed,
/// sleeping according to `backoff` in between.
///
/// # Errors
///
/// Returns the last error once every attempt has failed.
pub async fn retry<F, Fut, T, E>(
    what: &str,
    backoff: Backoff,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) if attempt + 1 >= max_attempts => {
                tracing::error!(what, attempt, error = %err, "Giving up after retries");
                return Err(err);
            },
            Err(err) => {
                let delay = backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}
