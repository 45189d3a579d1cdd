//! Decision model: what the worker does after a failed attempt.
//!
//! `Decision` は次の行動、`Decider` はそれを決める純粋関数。
//! 実際の sleep / fail は worker が行う。

use std::time::Duration;

use super::errors::JobError;
use super::job::Job;

/// The next action after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Wait `delay`, then attempt again.
    Retry { delay: Duration, reason: String },

    /// Give up. The job transitions to FAILED with `error`.
    Fail { error: JobError },
}

/// Decide the next action for a job whose latest attempt failed.
///
/// Deciders are pure: no side effects, no job mutation. `remaining` is what
/// is left of the job's timeout budget.
pub trait Decider: Send + Sync {
    fn decide(&self, job: &Job, error: &JobError, remaining: Duration) -> Decision;
}

/// Attempt/backoff/deadline logic driven by the job's own retry strategy.
///
/// Checks, in order:
/// 1. non-retryable errors fail as-is
/// 2. `attempts >= max_attempts` fails (retries exhausted)
/// 3. `delay + round_trip_estimate > remaining` fails (timeout dominates attempts)
/// 4. otherwise retry after `delay(attempts)`
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    round_trip_estimate: Duration,
}

impl DefaultDecider {
    pub fn new(round_trip_estimate: Duration) -> Self {
        Self { round_trip_estimate }
    }

    pub fn round_trip_estimate(&self) -> Duration {
        self.round_trip_estimate
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &Job, error: &JobError, remaining: Duration) -> Decision {
        if !error.kind.is_retryable() {
            return Decision::Fail {
                error: error.clone(),
            };
        }

        let strategy = job.retry_strategy();
        let attempts = job.attempts();
        if !strategy.should_retry(attempts) {
            return Decision::Fail {
                error: JobError::transient(format!(
                    "retries exhausted after {attempts}/{} attempts: {}",
                    strategy.max_attempts(),
                    error.message
                )),
            };
        }

        let delay = strategy.delay(attempts);
        if delay.saturating_add(self.round_trip_estimate) > remaining {
            return Decision::Fail {
                error: JobError::transient(format!(
                    "retry denied: backoff {delay:?} plus round-trip {:?} exceeds remaining budget {remaining:?}: {}",
                    self.round_trip_estimate, error.message
                )),
            };
        }

        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {delay:?}: {}",
                attempts + 1,
                strategy.max_attempts(),
                error.message
            ),
        }
    }
}
