//! Reconnect Pacing
//!
//! Exponential backoff with jitter between upstream reconnect attempts.
//! Attempts are unbounded: the session retries until shutdown.

use std::time::Duration;

use rand::Rng;

/// Backoff settings.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Backoff state for one connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy at its initial delay.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    /// Advance to the next attempt and return its delay.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.jittered(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = self.current_delay.as_millis() as f64 * self.config.multiplier;
        let max_millis = self.config.max_delay.as_millis();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            (scaled.round() as u128).min(max_millis)
        } else {
            max_millis
        };
        self.current_delay = Duration::from_millis(u64::try_from(next_millis).unwrap_or(u64::MAX));

        delay
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Back to the initial delay after a successful connect.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt = 0;
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base = delay.as_millis() as f64;
        let spread = base * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (base + offset).max(1.0) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial_ms: u64, max_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn doubles_until_capped() {
        let mut policy = no_jitter(500, 3_000);
        let delays: Vec<u128> = (0..5).map(|_| policy.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 3_000, 3_000]);
        assert_eq!(policy.attempt(), 5);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut policy = no_jitter(100, 10_000);
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1_000),
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().as_millis();
            assert!((900..=1_100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }
}
