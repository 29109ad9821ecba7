use rand::Rng;
use std::time::Duration;

/// Exponential backoff for batch submission.
///
/// Pure: the delay depends only on the attempt number. Jitter is layered on
/// by [`jittered`] at the call site so the policy itself stays testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on any single wait, server hints included.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to wait after `attempt` (1-based) failed, or `None` when that was
    /// the last allowed attempt.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        // Cap the exponent to prevent overflow
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(2_u32.pow(exponent));
        Some(delay.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Apply ±20% randomness to a delay.
pub fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    delay.mul_f64(factor)
}
