//! Tagged freshness cache: the fetch-policy handler (C3, §4.2) and the
//! write-policy handler (C4, §4.3) that sit in front of a [`Backend`].

mod config;
mod fetch;
mod stats;
mod write;

pub use config::{CacheConfig, FetchPolicy, WritePolicy};
pub use fetch::{FetchPolicyHandler, QueryAccessor};
pub use stats::{CacheStats, EvictionReason};
pub use write::WritePolicyHandler;
