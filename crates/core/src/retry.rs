//! Retry policy for count acquisition
//!
//! Two backoff curves are used: a short one after an attempt that returned an
//! invalid (zero) count and a longer one after an attempt that failed outright.

use std::time::Duration;

/// Exponential backoff curve with a ceiling
///
/// # Example
///
/// ```
/// use shelfwatch_core::retry::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::exponential(Duration::from_secs(1), Duration::from_secs(10));
///
/// assert_eq!(backoff.delay_after(1), Duration::from_secs(1));
/// assert_eq!(backoff.delay_after(2), Duration::from_secs(2));
/// assert_eq!(backoff.delay_after(5), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay after the first failed attempt
    pub initial_interval: Duration,

    /// Maximum delay between attempts
    pub max_interval: Duration,

    /// Backoff multiplier (2.0 for doubling)
    pub backoff_coefficient: f64,
}

impl Backoff {
    /// Doubling backoff
    pub fn exponential(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            backoff_coefficient: 2.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    ///
    /// `min(initial * coefficient^(attempt-1), max)`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::from_secs_f64(base.min(self.max_interval.as_secs_f64()))
    }
}

/// Bounded retry budget for one acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Backoff after an attempt that produced a zero or non-numeric count
    pub invalid_count_backoff: Backoff,

    /// Backoff after an attempt that failed with an error
    pub error_backoff: Backoff,

    /// Upper bound on a single fetch
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    /// - 3 attempts
    /// - invalid count: 1s, 2s, 4s ... capped at 10s
    /// - errors: 2s, 4s, 8s ... capped at 15s
    /// - 60 second attempt timeout
    fn default() -> Self {
        Self {
            max_attempts: 3,
            invalid_count_backoff: Backoff::exponential(
                Duration::from_secs(1),
                Duration::from_secs(10),
            ),
            error_backoff: Backoff::exponential(Duration::from_secs(2), Duration::from_secs(15)),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the maximum number of attempts (at least 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}
