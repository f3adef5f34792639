//! The `Backend` contract (§6) and the pool's factory/health-check
//! contracts. Concrete backends (embedded DB, REST client, in-memory
//! cache) are out of scope (§1) — only the interface is specified here.

use crate::common::{Entity, EntityId};
use crate::error::{BackendError, Result};
use crate::query::{PagedResult, Query};
use crate::reactive::{EventBus, ReplayCell};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Current synchronization state of a backend with its authoritative
/// upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

/// A locally-applied write that has not yet been confirmed upstream.
#[derive(Debug, Clone)]
pub struct PendingChange<ID> {
    pub id: ID,
    pub attempted_at: std::time::Instant,
    pub retry_count: u32,
}

/// A detected conflict between a local write and the upstream state.
#[derive(Debug, Clone)]
pub struct Conflict<T, ID> {
    pub id: ID,
    pub local: Option<T>,
    pub remote: Option<T>,
}

/// A stream of entities or ids, boxed for dyn-compatibility.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// The backend contract every storage implementation satisfies (§6).
///
/// `supports_*` flags are interrogated by the composite backend (§4.6)
/// and the fetch/write policy handlers to decide fallback behaviour.
#[async_trait]
pub trait Backend<T: Entity, ID: EntityId>: Send + Sync {
    fn name(&self) -> &str;

    fn supports_offline(&self) -> bool {
        false
    }
    fn supports_realtime(&self) -> bool {
        false
    }
    fn supports_transactions(&self) -> bool {
        false
    }
    fn supports_pagination(&self) -> bool {
        false
    }

    async fn initialize(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;

    async fn get(&self, id: &ID) -> Result<Option<T>>;
    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>>;
    async fn get_all_paged(&self, query: Option<&Query>) -> Result<PagedResult<T>> {
        // Default for backends without native pagination: one full page.
        let items = self.get_all(query).await?;
        let total = items.len() as u64;
        Ok(PagedResult { items, page_info: crate::query::PageInfo::complete(total) })
    }

    fn watch(&self, id: &ID) -> BoxStream<'static, Option<T>>;
    fn watch_all(&self, query: Option<&Query>) -> BoxStream<'static, Vec<T>>;
    /// Paged counterpart of `watch_all`. Default for backends without
    /// native paged streaming: wraps each `watch_all` emission as a
    /// single, complete page.
    fn watch_all_paged(&self, query: Option<&Query>) -> BoxStream<'static, PagedResult<T>> {
        use futures::StreamExt;
        Box::pin(self.watch_all(query).map(|items| {
            let total = items.len() as u64;
            PagedResult { items, page_info: crate::query::PageInfo::complete(total) }
        }))
    }

    async fn save(&self, item: T) -> Result<T>;
    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>>;
    async fn delete(&self, id: &ID) -> Result<()>;
    async fn delete_all(&self, ids: &[ID]) -> Result<()>;
    async fn delete_where(&self, query: &Query) -> Result<u64>;

    async fn sync(&self) -> Result<()>;
    fn sync_status(&self) -> SyncStatus;
    fn sync_status_stream(&self) -> BoxStream<'static, SyncStatus>;

    fn pending_changes_count(&self) -> u64;
    fn pending_changes_stream(&self) -> BoxStream<'static, PendingChange<ID>>;
    fn conflicts_stream(&self) -> BoxStream<'static, Conflict<T, ID>>;

    async fn retry_change(&self, id: &ID) -> Result<()>;
    async fn cancel_change(&self, id: &ID) -> Result<()>;

    /// Begin a native transaction, gated on `supports_transactions`.
    async fn begin_transaction(&self) -> Result<u64> {
        Err(BackendError::new(format!("{} does not support native transactions", self.name())).into())
    }
    async fn commit_transaction(&self, _txn: u64) -> Result<()> {
        Err(BackendError::new(format!("{} does not support native transactions", self.name())).into())
    }
}

/// Factory contract for the connection pool (§6). `create`/`destroy`
/// never fail-propagate past `create`: `destroy` must swallow its own
/// errors (§4.1).
#[async_trait]
pub trait ConnectionFactory<R: Send + Sync + 'static>: Send + Sync {
    async fn create(&self) -> Result<R>;
    async fn destroy(&self, resource: R);
    async fn validate(&self, resource: &R) -> bool;
}

/// Health-check contract for the pool's background maintenance (§4.1).
/// Both methods are non-throwing by contract.
#[async_trait]
pub trait HealthCheck<R: Send + Sync + 'static>: Send + Sync {
    async fn is_healthy(&self, resource: &R) -> bool;
    async fn reset(&self, resource: &mut R) -> bool;
}

/// Convenience bundle of the reactive primitives a hand-written `Backend`
/// commonly needs for its sync/pending/conflict streams — not part of the
/// trait contract, just a building block backends (or tests) can embed.
pub struct BackendSignals<T: Entity, ID: EntityId> {
    pub sync_status: ReplayCell<SyncStatus>,
    pub pending_changes: EventBus<PendingChange<ID>>,
    pub conflicts: EventBus<Conflict<T, ID>>,
}

impl<T: Entity, ID: EntityId> BackendSignals<T, ID> {
    pub fn new() -> Self {
        Self {
            sync_status: ReplayCell::new(SyncStatus::Idle),
            pending_changes: EventBus::new(256),
            conflicts: EventBus::new(256),
        }
    }
}

impl<T: Entity, ID: EntityId> Default for BackendSignals<T, ID> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type SharedBackend<T, ID> = Arc<dyn Backend<T, ID>>;
