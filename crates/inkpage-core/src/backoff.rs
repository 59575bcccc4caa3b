//! Capped exponential backoff.
//!
//! `delay = min(base * 2^attempt, cap)`, no jitter, so retry timing is
//! reproducible in tests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff parameters in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl BackoffConfig {
    pub const fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self { base_ms, cap_ms }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }
}

/// Attempt counter over a [`BackoffConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn config(&self) -> BackoffConfig {
        self.config
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt, without advancing.
    pub fn current_delay(&self) -> Duration {
        self.config.delay(self.attempt)
    }

    /// Record a failure: returns the delay to wait and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
