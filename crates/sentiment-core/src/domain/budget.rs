//! Budget - job の時間予算
//!
//! `Timeout` はミリ秒単位の意味型。バス上では数値（ms）としてそのまま運ぶ。

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on a job's lifecycle, from activation to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeout(u64);

impl Timeout {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::from_secs(30)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
