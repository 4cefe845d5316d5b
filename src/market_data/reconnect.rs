// Exponential backoff with jitter for re-opening the shared streaming connection.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized in both directions (0.1 = +-10%).
    pub jitter_factor: f64,
    /// 0 = keep trying while anyone is subscribed.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = Duration::from_millis(config.initial_delay_ms);
        Self { config, current_delay, attempt_count: 0 }
    }

    /// Delay before the next attempt, or `None` when reconnecting should stop.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);

        let next_ms = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_ms = if next_ms.is_finite() && next_ms > 0.0 { next_ms as u64 } else { 0 };
        self.current_delay = Duration::from_millis(next_ms.min(self.config.max_delay_ms));

        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current_delay = Duration::from_millis(self.config.initial_delay_ms);
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let base = delay.as_millis() as f64;
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::thread_rng().gen_range(-range..=range);
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }
}
