//! Outbound Rate Governor
//!
//! Token bucket bounding the outbound message rate. Tokens refill
//! continuously in proportion to elapsed time and are computed lazily on each
//! call, so no background timer is needed. Callers that are refused a token
//! queue their message instead of waiting.

use tokio::time::Instant;

/// Token bucket with continuous, lazily computed refill.
///
/// Uses [`tokio::time::Instant`] so a paused test clock drives refill
/// deterministically.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateGovernor {
    /// Create a full bucket.
    ///
    /// Non-positive or non-finite values are clamped to one token and zero
    /// refill respectively.
    #[must_use]
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = if capacity.is_finite() && capacity > 0.0 {
            capacity
        } else {
            1.0
        };
        let refill_per_sec = if refill_per_sec.is_finite() && refill_per_sec > 0.0 {
            refill_per_sec
        } else {
            0.0
        };

        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Bucket allowing `rate` messages per second with a one-second burst.
    #[must_use]
    pub fn per_second(rate: u32) -> Self {
        Self::new(f64::from(rate), f64::from(rate))
    }

    /// Take `cost` tokens if available.
    pub fn try_consume(&mut self, cost: f64) -> bool {
        self.refill();

        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Maximum tokens the bucket can hold.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_per_sec, self.tokens)
            .min(self.capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn starts_full() {
        let mut governor = RateGovernor::new(10.0, 10.0);
        assert!((governor.available() - 10.0).abs() < 0.5);
        assert!((governor.capacity() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn refuses_when_empty() {
        let mut governor = RateGovernor::new(3.0, 0.0);
        assert!(governor.try_consume(1.0));
        assert!(governor.try_consume(2.0));
        assert!(!governor.try_consume(1.0));
    }

    #[test]
    fn invalid_parameters_are_clamped() {
        let mut governor = RateGovernor::new(-5.0, f64::NAN);
        assert!((governor.capacity() - 1.0).abs() < f64::EPSILON);
        assert!(governor.try_consume(1.0));
        assert!(!governor.try_consume(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_proportionally_to_elapsed_time() {
        let mut governor = RateGovernor::new(10.0, 10.0);
        assert!(governor.try_consume(10.0));
        assert!(!governor.try_consume(1.0));

        tokio::time::advance(Duration::from_millis(500)).await;

        let available = governor.available();
        assert!((4.0..=6.0).contains(&available), "available = {available}");
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let mut governor = RateGovernor::per_second(5);
        assert!(governor.try_consume(5.0));

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!((governor.available() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn refill_with_real_clock() {
        let mut governor = RateGovernor::new(10.0, 10.0);
        assert!(governor.try_consume(10.0));

        std::thread::sleep(Duration::from_millis(500));

        let available = governor.available();
        assert!((4.0..=6.0).contains(&available), "available = {available}");
    }
}
