use rand::Rng;
use std::time::Duration;

/// Redelivery backoff for events that could not be committed
///
/// There is no retry cap: an event that keeps failing keeps its partition
/// parked at that offset, with the delay growing up to `max_backoff_ms`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: 100,
            max_backoff_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            backoff_ms,
            max_backoff_ms,
            jitter: true,
        }
    }

    /// No waiting between redeliveries
    pub fn immediate() -> Self {
        Self {
            backoff_ms: 0,
            max_backoff_ms: 0,
            jitter: false,
        }
    }

    /// Calculate backoff duration for the `attempt`-th consecutive failure
    ///
    /// `attempt` starts at 1.
    pub fn get_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let backoff = self.backoff_ms.saturating_mul(2_u64.pow(exponent));
        let capped = backoff.min(self.max_backoff_ms);

        if self.jitter && capped > 0 {
            let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
            Duration::from_millis((capped as f64 * jitter_factor) as u64)
        } else {
            Duration::from_millis(capped)
        }
    }
}
