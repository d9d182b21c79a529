//! Reconnect Backoff
//!
//! Delay before attempt `n` (1-based) is `initial * multiplier^(n-1)`, capped
//! at `max`, then spread by a random jitter. Attempts are unbounded: a feed
//! keeps retrying at the cap until a connection goes live and resets the
//! counter.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Default jitter as a fraction of the computed delay.
const DEFAULT_JITTER: f64 = 0.1;

/// Backoff tunables.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Fraction of the delay randomized in both directions; 0 disables.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_websocket_settings(&WebSocketSettings::default())
    }
}

impl ReconnectConfig {
    /// Backoff drawn from the socket settings.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: DEFAULT_JITTER,
        }
    }

    /// Un-jittered delay for a 1-based attempt number.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.max(self.initial_delay);

        let scaled = self.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Attempt counter handing out backoff delays.
///
/// # Example
///
/// ```rust
/// use feed_normalizer::application::services::feed::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert!(policy.next_delay() > std::time::Duration::ZERO);
/// assert_eq!(policy.attempt_count(), 1);
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Policy with no attempts made yet.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Count one more attempt and return how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        jitter(self.config.base_delay(self.attempts), self.config.jitter_factor)
    }

    /// Forget past attempts; called when a connection goes live.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delays handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }
}

fn jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let spread = factor.min(1.0);
    let scale: f64 = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
    delay.mul_f64(scale).max(Duration::from_millis(1))
}
