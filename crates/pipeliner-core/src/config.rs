//! Engine configuration

use crate::error::PipelinerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and capacity of the completion dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelinerConfig {
    /// How long a pending chain or removal may wait for confirmations
    #[serde(rename = "pending_ttl_ms", with = "millis")]
    pub pending_ttl: Duration,
    /// Period of the group checker
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Capacity of each pending map
    pub max_pending: u64,
}

impl PipelinerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With pending TTL
    #[inline]
    #[must_use]
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// With pending map capacity
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max: u64) -> Self {
        self.max_pending = max;
        self
    }

    /// Reject settings the engine cannot run with
    ///
    /// # Errors
    /// Returns `PipelinerError::InvalidConfig` for zero durations or capacity
    pub fn validate(&self) -> Result<(), PipelinerError> {
        if self.pending_ttl.is_zero() {
            return Err(PipelinerError::InvalidConfig(
                "pending_ttl_ms must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PipelinerError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_pending == 0 {
            return Err(PipelinerError::InvalidConfig(
                "max_pending must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelinerConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(20),
            poll_interval: Duration::from_millis(500),
            max_pending: 100_000,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
