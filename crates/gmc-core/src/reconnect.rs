//! Backoff policy for reconnecting links.
//!
//! Used by the MQTT gateway when the broker drops the session. The serial
//! link needs no backoff: the poll loop simply reopens it on the next cycle.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Options for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectOptions {
    /// Create new reconnect options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set initial delay before first reconnection attempt.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before attempt number `attempt` (0-based).
    ///
    /// Grows as `initial_delay × multiplier^attempt`, capped at `max_delay`.
    /// Jitter is applied after the cap, so a jittered delay can exceed
    /// `max_delay` by up to a quarter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidConfig(
                "initial_delay must be > 0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::InvalidConfig(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let options = ReconnectOptions::new()
            .max_delay(Duration::from_secs(10))
            .jitter(false);

        assert_eq!(options.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(options.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(options.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(options.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(options.delay_for_attempt(1000), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let options = ReconnectOptions::new();
        for attempt in 0..10 {
            let base = ReconnectOptions::new()
                .jitter(false)
                .delay_for_attempt(attempt);
            let delay = options.delay_for_attempt(attempt);
            assert!(delay >= base);
            assert!(delay.as_secs_f64() <= base.as_secs_f64() * 1.25 + 1e-9);
        }
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectOptions::default().validate().is_ok());
        assert!(
            ReconnectOptions::new()
                .backoff_multiplier(0.5)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectOptions::new()
                .initial_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectOptions::new()
                .initial_delay(Duration::from_secs(5))
                .max_delay(Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }
}
