//! Backoff policy for transiently failing queue entries.

use std::time::Duration;

/// Exponential backoff with a hard cap on the number of retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Growth factor applied per retry.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,

    /// Number of retries granted after the first failed attempt.
    pub max_tries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
            max_tries: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `tries` (0-indexed).
    ///
    /// `initial_delay * multiplier^tries`, capped at `max_delay`. With the
    /// defaults that gives 30s, 1m, 2m, 4m, 8m.
    pub fn delay_for(&self, tries: u32) -> Duration {
        let exponent = i32::try_from(tries).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs >= cap {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether an entry that already used `tries` retries may get another.
    pub fn allows(&self, tries: u32) -> bool {
        tries < self.max_tries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_doubles_from_thirty_seconds() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(0), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(90),
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for(2), Duration::from_secs(90));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(90));
    }

    #[test]
    fn retries_stop_at_max_tries() {
        let policy = RetryPolicy::default();

        assert!(policy.allows(0));
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }
}
