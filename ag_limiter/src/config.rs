use std::time::Duration;

use serde::Deserialize;

use crate::error::RateLimitError;
use crate::error::Result;

/// What `release` does with a returned permit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Released permits are dropped; only the window reset restores capacity.
    /// The limit is a strict quota of `max_permits` per window.
    #[default]
    Discard,

    /// Released permits go back to the pool (capped at `max_permits`) and wake one waiter
    Return,
}

/// Limiter settings as read from a config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Length of the replenishment window in milliseconds
    pub window_ms: u64,

    /// Operations admitted per window
    pub max_permits: u32,

    pub release_policy: ReleasePolicy,
}

impl LimiterConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Check the same preconditions the limiter enforces at construction
    pub fn validate(&self) -> Result<()> {
        validate(self.max_permits, self.window())
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { window_ms: 1000, max_permits: 5, release_policy: ReleasePolicy::Discard }
    }
}

pub(crate) fn validate(max_permits: u32, window: Duration) -> Result<()> {
    if max_permits == 0 {
        return Err(RateLimitError::InvalidConfiguration("max_permits must be greater than 0"));
    }
    if window.is_zero() {
        return Err(RateLimitError::InvalidConfiguration("window must be greater than 0"));
    }
    Ok(())
}
