use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with jitter and a give-up limit.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of each delay that may be randomly shaved off, in `0.0..=1.0`.
    pub jitter: f64,
    /// Retries allowed after the first failure. A caller that retries until
    /// `next_delay` returns `None` gives up on failure `max_attempts + 1`.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms)),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            max_attempts: config.max_attempts,
        }
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(63) as i32);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Record a failure and return how long to wait before the next try,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let base = self.policy.base_delay(self.attempt);
        self.attempt += 1;

        if self.policy.jitter == 0.0 {
            return Some(base);
        }
        let shave = rand::thread_rng().gen_range(0.0..=self.policy.jitter);
        Some(base.mul_f64(1.0 - shave))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
