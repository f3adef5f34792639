//! Fetch/write-policy configuration (§4.2, §4.3).

use crate::error::StoreError;
use std::time::Duration;

/// `get`/`get_all` policy (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    CacheOnly,
    CacheFirst,
    NetworkFirst,
    NetworkOnly,
    CacheAndNetwork,
}

/// `save`/`save_all`/`delete` policy (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    Optimistic,
    CacheOnly,
    RemoteFirst,
    RemoteOnly,
}

/// Configuration for the fetch-policy handler's freshness index.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub stale_duration: Duration,
    pub default_fetch_policy: FetchPolicy,
    pub default_write_policy: WritePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_duration: Duration::from_secs(60),
            default_fetch_policy: FetchPolicy::CacheFirst,
            default_write_policy: WritePolicy::Optimistic,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.stale_duration.is_zero() {
            return Err(StoreError::InvalidConfig(
                "stale_duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
