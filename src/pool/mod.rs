//! The generic connection pool (C1 + C2, §4.1).

mod config;
mod metrics;
mod pool;
mod wait_queue;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use pool::{ConnectionPool, PooledHandle};
pub use wait_queue::{Ticket, WaitQueue};
