//! Reconnect policy with jittered exponential back-off for the room-server
//! control-plane connection.

use std::time::Duration;

/// Controls how the worker reconnects to the room-server after a dropped
/// control-plane connection.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// `0` means unlimited retries.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure — just enough to spread reconnect storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    (hash as f64) / (u32::MAX as f64)
}
