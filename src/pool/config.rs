//! Pool configuration (§3 "Pool config", §4.1).

use crate::error::PoolError;
use std::time::Duration;

/// Immutable-after-construction configuration for a [`super::ConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub health_check_interval: Duration,
    pub idle_trim_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
            test_on_borrow: false,
            test_on_return: false,
            health_check_interval: Duration::from_secs(60),
            idle_trim_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Validates the invariants from §3: `0 <= min <= max`, a positive
    /// acquire timeout, and non-negative durations (guaranteed by `Duration`
    /// itself — only the ordering needs checking here).
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_connections > self.max_connections {
            return Err(PoolError::InvalidConfig(format!(
                "min_connections ({}) > max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "acquire_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Builder for [`PoolConfig`] (teacher's `PoolConfigBuilder` pattern).
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn min_connections(mut self, n: usize) -> Self {
        self.config.min_connections = n;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.max_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, d: Duration) -> Self {
        self.config.acquire_timeout = d;
        self
    }

    pub fn max_lifetime(mut self, d: Duration) -> Self {
        self.config.max_lifetime = Some(d);
        self
    }

    pub fn idle_timeout(mut self, d: Duration) -> Self {
        self.config.idle_timeout = Some(d);
        self
    }

    pub fn test_on_borrow(mut self, v: bool) -> Self {
        self.config.test_on_borrow = v;
        self
    }

    pub fn test_on_return(mut self, v: bool) -> Self {
        self.config.test_on_return = v;
        self
    }

    pub fn build(self) -> Result<PoolConfig, PoolError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
