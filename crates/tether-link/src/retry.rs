use std::time::Duration;

/// Reconnect backoff: `min(base * multiplier * max(attempts, 1), cap)`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Consecutive transient failures tolerated before credentials are
    /// assumed corrupt and dropped. Zero disables the reset.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Pause after session open before pushing credentials, so the
    /// library can finish writing its final session keys.
    pub sync_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            sync_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = self.multiplier.max(0.0) * f64::from(attempts.max(1));
        let delay_ms = self.base_delay.as_millis() as f64 * factor;
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(20));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(100), Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_still_waits() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
    }

    #[test]
    fn multiplier_scales() {
        let policy = RetryPolicy {
            multiplier: 1.5,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(2), Duration::from_secs(15));
    }

    #[test]
    fn exhaustion() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));

        let unbounded = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(!unbounded.exhausted(1000));
    }
}
