//! Exponential reconnect backoff with randomized jitter.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Backoff {
            current_delay: config.initial_delay(),
            config,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Call after every successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay();
    }

    /// Returns the delay to wait before the next attempt and grows the
    /// following one, capped at the configured maximum.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let delay = self.current_delay;
        let jitter_ms = delay.as_millis() as f64 * self.config.jitter;
        let delay = if jitter_ms >= 1.0 {
            let offset = rand::rng().random_range(-jitter_ms..=jitter_ms);
            Duration::from_millis((delay.as_millis() as f64 + offset).max(1.0) as u64)
        } else {
            delay
        };

        let next_ms = (self.current_delay.as_millis() as f64 * self.config.multiplier) as u64;
        self.current_delay = Duration::from_millis(next_ms).min(self.config.max_delay());

        delay
    }
}
