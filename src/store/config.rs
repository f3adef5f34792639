//! Store facade configuration (§4.7, §9 ambient config section).

use crate::cache::{CacheConfig, FetchPolicy, WritePolicy};
use crate::error::StoreError;
use crate::memory::MemoryConfig;
use crate::metrics::MetricsConfig;
use std::time::Duration;

/// Aggregate configuration for a [`super::Store`] — one `Config` struct
/// per subsystem, matching the teacher's per-module config convention.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub memory: Option<MemoryConfig>,
    pub default_transaction_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            memory: Some(MemoryConfig::default()),
            default_transaction_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        self.cache.validate().map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        if self.default_transaction_timeout.is_zero() {
            return Err(StoreError::InvalidConfig(
                "default_transaction_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }
}

/// Builder for [`StoreConfig`] (teacher's `PoolConfigBuilder` pattern,
/// reused here for the facade's own config).
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn default_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.config.cache.default_fetch_policy = policy;
        self
    }

    pub fn default_write_policy(mut self, policy: WritePolicy) -> Self {
        self.config.cache.default_write_policy = policy;
        self
    }

    pub fn stale_duration(mut self, d: Duration) -> Self {
        self.config.cache.stale_duration = d;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.config.metrics.sample_rate = rate;
        self
    }

    pub fn memory(mut self, memory: Option<MemoryConfig>) -> Self {
        self.config.memory = memory;
        self
    }

    pub fn default_transaction_timeout(mut self, d: Duration) -> Self {
        self.config.default_transaction_timeout = d;
        self
    }

    pub fn build(self) -> Result<StoreConfig, StoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
