//! Exponential backoff for redialing tunnels

use chunkmux_common::BackoffConfig;
use std::time::Duration;

const GROWTH: f64 = 2.0;

/// Delay calculator for one tunnel slot. Reset it after a successful dial.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failed dial. Returns how long to wait before the next one,
    /// or `None` once `max_attempts` consecutive failures were seen.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.config.max_attempts != 0 && self.failures >= self.config.max_attempts {
            return None;
        }
        let delay = self.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.min(63)).unwrap_or(63);
        let exp = self.config.base.as_secs_f64() * GROWTH.powi(exponent);

        let spread = exp * self.config.jitter_factor.clamp(0.0, 1.0);
        let jitter = if spread > 0.0 {
            rand::random_range(-spread..=spread)
        } else {
            0.0
        };

        let secs = (exp + jitter).max(0.0).min(self.config.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: u64, max: u64) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(base),
            max: Duration::from_secs(max),
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let mut backoff = Backoff::new(config(1, 60));

        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.failures(), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new(config(10, 30));

        let _ = backoff.on_failure();
        let _ = backoff.on_failure();
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(30)));
        for _ in 0..100 {
            assert!(backoff.on_failure().unwrap() <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = Backoff::new(BackoffConfig {
            jitter_factor: 0.5,
            ..config(4, 60)
        });

        let delay = backoff.on_failure().unwrap();
        assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(6));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_attempts: 2,
            ..config(1, 60)
        });

        assert!(backoff.on_failure().is_some());
        assert!(backoff.on_failure().is_some());
        assert!(backoff.on_failure().is_none());

        backoff.reset();
        assert!(backoff.on_failure().is_some());
    }
}
