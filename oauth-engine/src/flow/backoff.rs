//! Retry and Backoff Policies
//!
//! Bounded polling policies injected into the locator engine and the mailbox handler.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_delay_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    },
    Linear {
        initial_delay_ms: u64,
        increment_ms: u64,
    },
}

impl BackoffStrategy {
    /// Calculate delay for the given attempt number (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        match self {
            BackoffStrategy::Fixed { delay_ms } => *delay_ms,
            BackoffStrategy::Exponential {
                initial_delay_ms,
                multiplier,
                max_delay_ms,
            } => {
                let delay = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                if delay.is_finite() {
                    (delay as u64).min(*max_delay_ms)
                } else {
                    *max_delay_ms
                }
            }
            BackoffStrategy::Linear {
                initial_delay_ms,
                increment_ms,
            } => initial_delay_ms.saturating_add(increment_ms.saturating_mul(attempt as u64)),
        }
    }
}

/// Bounded retry policy: how many attempts, and how long to wait between them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: BackoffStrategy,
    /// Random spread applied to each delay, as a ratio in [0, 1]
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff: BackoffStrategy::Exponential {
                initial_delay_ms: 500,
                multiplier: 2.0,
                max_delay_ms: 2000,
            },
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed interval between attempts
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Fixed {
                delay_ms: interval.as_millis() as u64,
            },
            jitter: 0.0,
        }
    }

    /// Zero-delay policy, used where waiting would only slow tests down
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Set the jitter ratio (clamped to [0, 1])
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter = clamp_jitter(ratio);
        self
    }

    /// Number of attempts, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given (0-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.calculate_delay(attempt);
        // Deserialized policies bypass `with_jitter`
        let jitter = clamp_jitter(self.jitter);
        if base == 0 || jitter <= 0.0 {
            return Duration::from_millis(base);
        }

        let spread = rand::thread_rng().gen_range(-jitter..=jitter);
        let jittered = (base as f64) * (1.0 + spread);
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    /// Sleep for the delay that follows the given attempt
    pub async fn wait(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn clamp_jitter(ratio: f64) -> f64 {
    if ratio.is_finite() {
        ratio.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
