//! Retry policy: decides backoff delays.

use std::time::Duration;

use crate::domain::CourierError;

/// Retry policy for one topic.
///
/// Explicit `delays` cover the first retries; past the table the last entry is
/// multiplied by `backoff_multiplier` per extra ordinal and capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delays: Vec<Duration>,
    backoff_multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAYS: [Duration; 3] = [
        Duration::from_secs(60),
        Duration::from_secs(300),
        Duration::from_secs(900),
    ];
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1800);

    pub fn new(
        max_attempts: u32,
        delays: Vec<Duration>,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self, CourierError> {
        if max_attempts == 0 {
            return Err(CourierError::Validation("max_attempts must be at least 1".to_string()));
        }
        if delays.is_empty() {
            return Err(CourierError::Validation("delays must not be empty".to_string()));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(CourierError::Validation(format!(
                "backoff_multiplier must be a finite value >= 1, got {backoff_multiplier}"
            )));
        }
        Ok(Self {
            max_attempts,
            delays,
            backoff_multiplier,
            max_delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before retry number `ordinal` (1-based). Ordinal 0 has no delay.
    pub fn delay_for(&self, ordinal: u32) -> Duration {
        if ordinal == 0 {
            return Duration::ZERO;
        }
        let ordinal = ordinal as usize;
        if ordinal <= self.delays.len() {
            return self.delays[ordinal - 1];
        }
        let Some(last) = self.delays.last() else {
            return Duration::ZERO;
        };

        let exponent = i32::try_from(ordinal - self.delays.len()).unwrap_or(i32::MAX);
        let scaled_ms = last.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let cap_ms = self.max_delay.as_millis() as f64;
        if !scaled_ms.is_finite() || scaled_ms >= cap_ms {
            return self.max_delay;
        }
        Duration::from_millis(scaled_ms as u64)
    }

    /// `current_retry_count` retries used so far; true while budget remains.
    pub fn can_retry(&self, current_retry_count: u32) -> bool {
        current_retry_count < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            delays: Self::DEFAULT_DELAYS.to_vec(),
            backoff_multiplier: Self::DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[rstest]
    #[case::no_retry_yet(0, 0)]
    #[case::first(1, 60_000)]
    #[case::second(2, 300_000)]
    #[case::third(3, 900_000)]
    #[case::first_past_table_hits_cap(4, 1_800_000)]
    #[case::stays_capped(5, 1_800_000)]
    #[case::far_out(200, 1_800_000)]
    fn default_delays(#[case] ordinal: u32, #[case] expected_ms: u64) {
        assert_eq!(RetryPolicy::default().delay_for(ordinal), ms(expected_ms));
    }

    #[test]
    fn backoff_grows_below_the_cap() {
        let policy = RetryPolicy::new(10, vec![ms(100)], 3.0, ms(10_000)).unwrap();
        assert_eq!(policy.delay_for(1), ms(100));
        assert_eq!(policy.delay_for(2), ms(300));
        assert_eq!(policy.delay_for(3), ms(900));
        assert_eq!(policy.delay_for(4), ms(2_700));
        assert_eq!(policy.delay_for(5), ms(8_100));
        assert_eq!(policy.delay_for(6), ms(10_000));
    }

    #[test]
    fn explicit_delays_are_returned_verbatim_even_above_cap() {
        let policy = RetryPolicy::new(3, vec![ms(5_000)], 2.0, ms(1_000)).unwrap();
        assert_eq!(policy.delay_for(1), ms(5_000));
        assert_eq!(policy.delay_for(2), ms(1_000));
    }

    #[test]
    fn huge_ordinals_saturate_instead_of_overflowing() {
        let policy = RetryPolicy::new(3, vec![ms(1)], 10.0, ms(42)).unwrap();
        assert_eq!(policy.delay_for(u32::MAX), ms(42));
    }

    #[test]
    fn can_retry_is_false_past_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        for ordinal in 3..50 {
            assert!(!policy.can_retry(ordinal));
        }
    }

    #[rstest]
    #[case::zero_attempts(0, vec![ms(1)], 2.0)]
    #[case::empty_delays(3, vec![], 2.0)]
    #[case::shrinking(3, vec![ms(1)], 0.5)]
    #[case::nan(3, vec![ms(1)], f64::NAN)]
    fn invalid_policies_are_rejected(
        #[case] max_attempts: u32,
        #[case] delays: Vec<Duration>,
        #[case] multiplier: f64,
    ) {
        assert!(RetryPolicy::new(max_attempts, delays, multiplier, ms(1_000)).is_err());
    }
}
