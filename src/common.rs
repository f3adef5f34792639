//! Shared bounds and type aliases used across every subsystem.
//!
//! Mirrors the teacher's `common` module: a small set of trait bounds and
//! aliases that every other module imports, rather than a grab-bag of
//! unrelated helpers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Bound required of every identifier type `ID` used with the store.
pub trait EntityId: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static {}
impl<T> EntityId for T where T: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static {}

/// Bound required of every entity type `T` used with the store.
pub trait Entity: Clone + std::fmt::Debug + Send + Sync + 'static {}
impl<T> Entity for T where T: Clone + std::fmt::Debug + Send + Sync + 'static {}

/// Extracts an entity's identifier, used to register cache entries after
/// a successful `save`/`save_all` (§4.7).
pub type IdExtractor<T, ID> = Arc<dyn Fn(&T) -> ID + Send + Sync>;

/// A type-erased future, used where trait objects (`Arc<dyn Backend<..>>`)
/// need to return an owned future without `async_trait`'s boxing showing
/// through in the public signature.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Monotonically increasing id generator, shared by the pool's waiter ids
/// and the transaction engine's context ids.
#[derive(Debug, Default)]
pub struct IdSequence(std::sync::atomic::AtomicU64);

impl IdSequence {
    pub const fn new() -> Self {
        Self(std::sync::atomic::AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}
