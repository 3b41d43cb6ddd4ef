//! Capped exponential backoff.

use std::time::Duration;

/// delay(n) = min(base * multiplier^(n - 1), max), for the n-th consecutive
/// failure (1-indexed).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
        }
    }

    /// Claim polling after Control API errors: 5s, 25s, 125s, then 600s.
    pub fn claim() -> Self {
        Self::new(Duration::from_secs(5), 5.0, Duration::from_secs(600))
    }

    /// Between finalize attempts: 10s, 100s.
    pub fn finalize() -> Self {
        Self::new(Duration::from_secs(10), 10.0, Duration::from_secs(1000))
    }

    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_backoff_grows_then_caps() {
        let backoff = Backoff::claim();
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(25));
        assert_eq!(backoff.delay(3), Duration::from_secs(125));
        assert_eq!(backoff.delay(4), Duration::from_secs(600));
        assert_eq!(backoff.delay(400), Duration::from_secs(600));
    }

    #[test]
    fn zero_failures_uses_base() {
        assert_eq!(Backoff::finalize().delay(0), Duration::from_secs(10));
    }
}
