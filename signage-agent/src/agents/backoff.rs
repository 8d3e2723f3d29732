//! Poll backoff as explicit state transitions

use std::time::Duration;

/// Largest multiple of the normal interval a failing agent waits
pub const MAX_BACKOFF_MULTIPLIER: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    failures: u32,
    retry_after: Option<Duration>,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(self) -> Self {
        Self::default()
    }

    /// Counted failure; the next wait grows with the failure count
    pub fn on_failure(self) -> Self {
        Self {
            failures: self.failures.saturating_add(1),
            retry_after: None,
        }
    }

    /// Upstream asked for an explicit wait. The failure count is untouched.
    pub fn on_rate_limited(self, wait: Duration) -> Self {
        Self {
            failures: self.failures,
            retry_after: Some(wait),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// `min(failures / 2, 5)`, never below 1
    pub fn multiplier(&self) -> u32 {
        (self.failures / 2).clamp(1, MAX_BACKOFF_MULTIPLIER)
    }

    pub fn next_sleep(&self, interval: Duration) -> Duration {
        self.retry_after
            .unwrap_or_else(|| interval.saturating_mul(self.multiplier()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);

    #[test]
    fn test_multiplier_progression() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_sleep(INTERVAL), INTERVAL);

        let expected = [1, 1, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 5];
        for (count, multiplier) in (1..).zip(expected.iter().skip(1)) {
            backoff = backoff.on_failure();
            assert_eq!(backoff.failures(), count);
            assert_eq!(backoff.multiplier(), *multiplier, "failures = {}", count);
        }
        assert_eq!(backoff.next_sleep(INTERVAL), INTERVAL * 5);

        backoff = backoff.on_success();
        assert_eq!(backoff.next_sleep(INTERVAL), INTERVAL);
    }

    #[test]
    fn test_rate_limit_does_not_count() {
        let backoff = Backoff::new()
            .on_failure()
            .on_failure()
            .on_rate_limited(Duration::from_secs(120));
        assert_eq!(backoff.failures(), 2);
        assert_eq!(backoff.next_sleep(INTERVAL), Duration::from_secs(120));

        // Next counted failure drops the explicit wait again
        let backoff = backoff.on_failure();
        assert_eq!(backoff.next_sleep(INTERVAL), INTERVAL);
    }
}
