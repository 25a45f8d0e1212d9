//! Retry Policy
//!
//! Exponential backoff with jitter for exchange REST calls.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::UpstreamSettings;

/// Retry limits and delay growth for one exchange client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&UpstreamSettings::default())
    }
}

impl RetryPolicy {
    /// Build a policy from upstream settings.
    #[must_use]
    pub const fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
            multiplier: settings.backoff_multiplier,
            jitter_factor: settings.jitter_factor,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Start a fresh backoff sequence for one call.
    #[must_use]
    pub const fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempt: 0,
            current: self.initial_backoff,
        }
    }
}

/// Backoff state for a single call.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use market_crypto_proxy::infrastructure::exchanges::RetryPolicy;
///
/// let policy = RetryPolicy {
///     max_attempts: 3,
///     initial_backoff: Duration::from_millis(100),
///     max_backoff: Duration::from_secs(1),
///     multiplier: 2.0,
///     jitter_factor: 0.0,
/// };
/// let mut backoff = policy.backoff();
///
/// assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next_backoff(), None);
/// ```
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    current: Duration,
}

impl Backoff<'_> {
    /// Record a failed attempt and return the delay before the next one.
    ///
    /// Returns `None` once `max_attempts` attempts have been made.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let delay = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.policy.multiplier)
                .min(self.policy.max_backoff.as_secs_f64()),
        );

        Some(self.apply_jitter(delay))
    }

    /// Failed attempts recorded so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound on any delay this sequence hands out.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        self.policy.max_backoff
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.policy.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.policy.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, jitter_factor: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_factor,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = policy(6, 0.0);
        let mut backoff = policy.backoff();

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn single_attempt_never_retries() {
        let policy = RetryPolicy::no_retry();
        let mut backoff = policy.backoff();
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = policy(50, 0.1);
        for _ in 0..20 {
            let mut backoff = policy.backoff();
            let delay = backoff.next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(90), "{delay:?}");
            assert!(delay <= Duration::from_millis(110), "{delay:?}");
        }
    }

    #[test]
    fn defaults_follow_upstream_settings() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
    }
}
