//! Retry strategy: decides whether another attempt is allowed and how long to wait.
//!
//! The strategy is plain data so it travels with the job across the bus
//! instead of living only in worker memory.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackoffKind {
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryStrategyError {
    #[error("max_attempts must be positive")]
    ZeroAttempts,

    #[error("base_delay_ms ({base}) exceeds max_delay_ms ({max})")]
    BaseExceedsMax { base: u64, max: u64 },
}

/// Retry policy carried by a job.
///
/// Fields are private: a strategy is never mutated after construction.
/// Values decoded from the wire must go through [`RetryStrategy::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStrategy {
    max_attempts: u32,
    backoff: BackoffKind,
    #[serde(default)]
    base_delay_ms: u64,
    #[serde(default)]
    max_delay_ms: u64,
}

impl RetryStrategy {
    pub fn new(
        max_attempts: u32,
        backoff: BackoffKind,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, RetryStrategyError> {
        let strategy = Self {
            max_attempts,
            backoff,
            base_delay_ms: millis(base_delay),
            max_delay_ms: millis(max_delay),
        };
        strategy.validate()?;
        Ok(strategy)
    }

    /// Retry immediately.
    pub fn none(max_attempts: u32) -> Result<Self, RetryStrategyError> {
        Self::new(max_attempts, BackoffKind::None, Duration::ZERO, Duration::ZERO)
    }

    /// Always wait `delay` between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Result<Self, RetryStrategyError> {
        Self::new(max_attempts, BackoffKind::Fixed, delay, delay)
    }

    /// `min(max_delay, base_delay * 2^attempts)`.
    pub fn exponential(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, RetryStrategyError> {
        Self::new(max_attempts, BackoffKind::Exponential, base_delay, max_delay)
    }

    pub fn validate(&self) -> Result<(), RetryStrategyError> {
        if self.max_attempts == 0 {
            return Err(RetryStrategyError::ZeroAttempts);
        }
        if self.backoff != BackoffKind::None && self.base_delay_ms > self.max_delay_ms {
            return Err(RetryStrategyError::BaseExceedsMax {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> BackoffKind {
        self.backoff
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Is another attempt permitted after `attempts` attempts were made?
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt, given `attempts` attempts were made.
    ///
    /// Example with base=500ms, max=8s (exponential):
    /// - attempts 1: 1s
    /// - attempts 2: 2s
    /// - attempts 5: 8s (capped)
    pub fn delay(&self, attempts: u32) -> Duration {
        let ms = match self.backoff {
            BackoffKind::None => 0,
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                // 2^attempts; large exponents saturate and the cap handles it.
                let pow2 = 1_u64.checked_shl(attempts).unwrap_or(u64::MAX);
                self.base_delay_ms
                    .saturating_mul(pow2)
                    .min(self.max_delay_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
