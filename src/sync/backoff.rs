use std::time::Duration;

use rand::Rng;

use crate::config::EngineConfig;

/// Exponential retry delay: `initial · 2^retries`, capped at `max`, with up
/// to 10% random jitter added below the cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            initial: Duration::from_secs_f64(config.sync_initial_backoff_seconds),
            max: Duration::from_secs_f64(config.sync_max_backoff_seconds),
            jitter: 0.1,
        }
    }

    /// Delay before attempt number `retries + 1`, without jitter.
    pub fn base_delay(&self, retries: u32) -> Duration {
        let factor = 2f64.powi(retries.min(30) as i32);
        let secs = (self.initial.as_secs_f64() * factor).min(self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub fn delay(&self, retries: u32) -> Duration {
        let base = self.base_delay(retries);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter) * base.as_secs_f64();
        Duration::from_secs_f64((base.as_secs_f64() + extra).min(self.max.as_secs_f64()))
    }
}
