//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own error enum; all of them convert into the
//! single [`Error`] returned at the store facade boundary (see §7 of
//! SPEC_FULL.md). Telemetry failures never reach this type — the metrics
//! pipeline swallows and logs its own errors.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the connection pool (C2).
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("pool has not been initialised")]
    NotInitialised,

    #[error("pool is closed")]
    PoolClosed,

    #[error("acquire timed out after {0:?}")]
    AcquireTimeout(Duration),

    #[error("pool exhausted: {active} active, {max} max")]
    Exhausted { active: usize, max: usize },

    #[error("connection factory error: {0}")]
    ConnectionError(String),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by the transaction engine (C5).
#[derive(Error, Debug, Clone)]
#[error("transaction failed (rolled_back={was_rolled_back}): {cause}")]
pub struct TransactionError {
    pub was_rolled_back: bool,
    pub timed_out: bool,
    pub cause: String,
}

impl TransactionError {
    pub fn aborted(cause: impl Into<String>) -> Self {
        Self { was_rolled_back: true, timed_out: false, cause: cause.into() }
    }

    pub fn timed_out() -> Self {
        Self {
            was_rolled_back: true,
            timed_out: true,
            cause: "transaction timed out".to_string(),
        }
    }
}

/// Errors surfaced by a `Backend` implementation.
#[derive(Error, Debug, Clone)]
#[error("backend error: {0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors raised by the store facade (C8) itself.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store has not been initialised")]
    NotInitialised,

    #[error("store has been disposed")]
    Disposed,

    #[error("a transaction is already active on this facade")]
    TransactionAlreadyActive,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Unified crate error, returned at every public boundary.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;
