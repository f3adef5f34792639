//! Store facade (C8, §4.7): lifecycle, operation tracking, and
//! forwarding to the policy handlers, transaction engine, memory
//! manager, and metrics pipeline.

mod config;

pub use config::{StoreConfig, StoreConfigBuilder};

use crate::backend::{BoxStream, Conflict, PendingChange, SharedBackend, SyncStatus};
use crate::cache::{CacheStats, FetchPolicyHandler, FetchPolicy, QueryAccessor, WritePolicyHandler, WritePolicy};
use crate::common::{Entity, EntityId, IdExtractor};
use crate::error::{Error, Result, StoreError};
use crate::memory::{MemoryManager, MemoryMetricsSnapshot, PressureLevel};
use crate::metrics::{AggregatedStats, CacheOutcome, MetricsPipeline, OperationKind, Reporter, SyncOutcome};
use crate::query::{PagedResult, Query};
use crate::transaction::{CommitListener, Operation, TransactionEngine, Tx};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Lifecycle {
    Created = 0,
    Initialised = 1,
    Disposed = 2,
}

/// The unified client-side entity store facade (C8): one instance per
/// entity type `T` keyed by `ID`, wrapping a backend (often a
/// [`crate::composite::CompositeBackend`]) with policy-directed
/// reads/writes, a tagged freshness cache, a transaction engine, an
/// optional memory manager, and a metrics pipeline.
pub struct Store<T: Entity, ID: EntityId> {
    backend: SharedBackend<T, ID>,
    fetch: Arc<FetchPolicyHandler<T, ID>>,
    write: WritePolicyHandler<T, ID>,
    transactions: TransactionEngine<T, ID>,
    metrics: MetricsPipeline,
    memory: Option<Arc<MemoryManager<ID>>>,
    id_extractor: Option<IdExtractor<T, ID>>,
    lifecycle: AtomicU8,
}

impl<T: Entity, ID: EntityId> Store<T, ID> {
    /// Constructs the facade in the `Created` state; call
    /// [`initialize`](Self::initialize) before the first operation.
    /// `remote` is an optional second backend the write-policy handler
    /// contacts under `remote_first`/`remote_only`/`optimistic` (§4.3) —
    /// pass the same backend as `backend` again if there is only one.
    pub fn new(
        backend: SharedBackend<T, ID>,
        remote: Option<SharedBackend<T, ID>>,
        id_extractor: Option<IdExtractor<T, ID>>,
        config: StoreConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        config.validate().map_err(Error::Store)?;

        let fetch = Arc::new(FetchPolicyHandler::new(
            Arc::clone(&backend),
            config.cache.clone(),
            id_extractor.clone(),
        ));
        let write = WritePolicyHandler::new(Arc::clone(&backend), remote, config.cache.default_write_policy);
        let transactions = TransactionEngine::new(
            Arc::clone(&backend),
            id_extractor.clone().unwrap_or_else(|| {
                Arc::new(|_: &T| panic!("transaction() requires an id_extractor to be configured"))
            }),
            config.default_transaction_timeout,
        );
        let metrics = MetricsPipeline::new(config.metrics.clone(), reporter);
        let memory = config.memory.clone().map(|cfg| Arc::new(MemoryManager::new(cfg)));

        if let Some(memory) = &memory {
            let fetch_for_eviction = Arc::clone(&fetch);
            memory.set_eviction_listener(Box::new(move |ids: &[ID]| {
                for id in ids {
                    fetch_for_eviction.remove_entry(id);
                }
            }));
        }

        Self::wire_commit_listener(&transactions, &fetch);

        Ok(Self {
            backend,
            fetch,
            write,
            transactions,
            metrics,
            memory,
            id_extractor,
            lifecycle: AtomicU8::new(Lifecycle::Created as u8),
        })
    }

    fn wire_commit_listener(engine: &TransactionEngine<T, ID>, fetch: &Arc<FetchPolicyHandler<T, ID>>) {
        let fetch = Arc::clone(fetch);
        let listener: CommitListener<T, ID> = Box::new(move |ops: &[Operation<T, ID>]| {
            for op in ops {
                match op {
                    Operation::Save { id, .. } => fetch.record_cached_item(id.clone(), None),
                    Operation::Delete { id, .. } => fetch.invalidate(id),
                }
            }
        });
        engine.set_commit_listener(listener);
    }

    fn lifecycle(&self) -> Lifecycle {
        match self.lifecycle.load(Ordering::SeqCst) {
            0 => Lifecycle::Created,
            1 => Lifecycle::Initialised,
            _ => Lifecycle::Disposed,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.lifecycle() {
            Lifecycle::Created => Err(Error::Store(StoreError::NotInitialised)),
            Lifecycle::Disposed => Err(Error::Store(StoreError::Disposed)),
            Lifecycle::Initialised => Ok(()),
        }
    }

    /// `Created -> Initialised` (§4.7). Fails if called after `dispose`.
    pub async fn initialize(&self) -> Result<()> {
        if self.lifecycle() == Lifecycle::Disposed {
            return Err(Error::Store(StoreError::Disposed));
        }
        self.backend.initialize().await?;
        self.lifecycle.store(Lifecycle::Initialised as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Flushes the metrics pipeline once and closes the backend; any
    /// facade call that reaches a suspension point after this fails with
    /// `Disposed` (§5 "Cancellation").
    pub async fn dispose(&self) -> Result<()> {
        self.lifecycle.store(Lifecycle::Disposed as u8, Ordering::SeqCst);
        self.metrics.dispose().await;
        self.backend.close().await
    }

    // ---- reads (forwarded to C3) ----

    pub async fn get(&self, id: &ID, policy: Option<FetchPolicy>) -> Result<Option<T>> {
        self.ensure_usable()?;
        let fetch = Arc::clone(&self.fetch);
        let fetch_id = id.clone();
        let result = self
            .metrics
            .track_operation(OperationKind::Get, || async move { fetch.get(&fetch_id, policy).await })
            .await;
        if let Ok(item) = &result {
            self.metrics.record_cache(if item.is_some() { CacheOutcome::Hit } else { CacheOutcome::Miss });
            if let Some(memory) = &self.memory {
                memory.record_access(id);
            }
        }
        result
    }

    pub async fn get_all(&self, query: Option<&Query>, policy: Option<FetchPolicy>) -> Result<Vec<T>> {
        self.ensure_usable()?;
        self.metrics
            .track_operation(OperationKind::GetAll, || self.fetch.get_all(query, policy))
            .await
    }

    pub fn watch(&self, id: &ID) -> BoxStream<'static, Option<T>> {
        self.fetch.watch(id)
    }

    pub fn watch_all(&self, query: Option<&Query>) -> BoxStream<'static, Vec<T>> {
        self.fetch.watch_all(query)
    }

    pub async fn get_all_paged(&self, query: Option<&Query>) -> Result<PagedResult<T>> {
        self.ensure_usable()?;
        self.metrics
            .track_operation(OperationKind::GetAll, || self.backend.get_all_paged(query))
            .await
    }

    pub fn watch_all_paged(&self, query: Option<&Query>) -> BoxStream<'static, PagedResult<T>> {
        self.backend.watch_all_paged(query)
    }

    // ---- writes (forwarded to C4, then cache-registered per §4.7) ----

    pub async fn save(&self, item: T, policy: Option<WritePolicy>) -> Result<T> {
        self.ensure_usable()?;
        let saved = self
            .metrics
            .track_operation(OperationKind::Save, || self.write.save(item, policy))
            .await?;
        if let Some(extractor) = &self.id_extractor {
            let id = extractor(&saved);
            self.fetch.record_cached_item(id.clone(), None);
            if let Some(memory) = &self.memory {
                memory.record_item(id, Self::estimate_item_size(&saved));
            }
        }
        Ok(saved)
    }

    pub async fn save_all(&self, items: Vec<T>, policy: Option<WritePolicy>) -> Result<Vec<T>> {
        self.ensure_usable()?;
        let saved = self
            .metrics
            .track_operation(OperationKind::SaveAll, || self.write.save_all(items, policy))
            .await?;
        if let Some(extractor) = &self.id_extractor {
            for item in &saved {
                let id = extractor(item);
                self.fetch.record_cached_item(id.clone(), None);
                if let Some(memory) = &self.memory {
                    memory.record_item(id, Self::estimate_item_size(item));
                }
            }
        }
        Ok(saved)
    }

    /// Best-effort size estimate for the memory manager's byte budget
    /// (§4.5 "size estimation") — the stack footprint of `T`. Entities
    /// holding heap data (`String`, `Vec`, ...) will under-estimate; this
    /// crate has no reflection into `T`'s heap allocations to do better
    /// without a caller-supplied estimator.
    fn estimate_item_size(item: &T) -> usize {
        std::mem::size_of_val(item)
    }

    pub async fn delete(&self, id: &ID, policy: Option<WritePolicy>) -> Result<()> {
        self.ensure_usable()?;
        self.metrics
            .track_operation(OperationKind::Delete, || self.write.delete(id, policy))
            .await?;
        self.fetch.remove_entry(id);
        Ok(())
    }

    /// Deletes each id under the same write policy `delete` uses — the
    /// write-policy handler has no bulk variant, so this loops rather
    /// than forwarding straight to the backend's own `delete_all`,
    /// keeping `optimistic`/`remote_first` semantics per id.
    pub async fn delete_all(&self, ids: &[ID], policy: Option<WritePolicy>) -> Result<()> {
        self.ensure_usable()?;
        self.metrics
            .track_operation(OperationKind::DeleteAll, || async {
                for id in ids {
                    self.write.delete(id, policy).await?;
                }
                Ok(())
            })
            .await?;
        for id in ids {
            self.fetch.remove_entry(id);
        }
        Ok(())
    }

    pub async fn delete_where(&self, query: &Query) -> Result<u64> {
        self.ensure_usable()?;
        self.metrics.track_operation(OperationKind::DeleteWhere, || self.backend.delete_where(query)).await
    }

    // ---- sync / pending changes (forwarded directly to the backend) ----

    pub async fn sync(&self) -> Result<()> {
        self.ensure_usable()?;
        let result = self.metrics.track_operation(OperationKind::Sync, || self.backend.sync()).await;
        self.metrics.record_sync(if result.is_ok() { SyncOutcome::Success } else { SyncOutcome::Failure });
        result
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.backend.sync_status()
    }

    pub fn sync_status_stream(&self) -> BoxStream<'static, SyncStatus> {
        self.backend.sync_status_stream()
    }

    pub fn pending_changes_count(&self) -> u64 {
        self.backend.pending_changes_count()
    }

    pub fn pending_changes_stream(&self) -> BoxStream<'static, PendingChange<ID>> {
        self.backend.pending_changes_stream()
    }

    pub fn conflicts_stream(&self) -> BoxStream<'static, Conflict<T, ID>> {
        self.backend.conflicts_stream()
    }

    pub async fn retry_change(&self, id: &ID) -> Result<()> {
        self.ensure_usable()?;
        self.backend.retry_change(id).await
    }

    pub async fn cancel_change(&self, id: &ID) -> Result<()> {
        self.ensure_usable()?;
        self.backend.cancel_change(id).await
    }

    // ---- invalidation / tags (forwarded to C3) ----

    pub fn invalidate(&self, id: &ID) {
        self.fetch.invalidate(id);
    }

    pub fn invalidate_all(&self) {
        self.fetch.invalidate_all();
    }

    pub fn invalidate_by_tags(&self, tags: &[String]) {
        self.fetch.invalidate_by_tags(tags);
    }

    pub fn invalidate_by_ids(&self, ids: &[ID]) {
        self.fetch.invalidate_by_ids(ids);
    }

    pub async fn invalidate_where(&self, query: &Query, accessor: QueryAccessor<T>) -> Result<u64> {
        self.ensure_usable()?;
        self.metrics
            .track_operation(OperationKind::Invalidate, || self.fetch.invalidate_where(query, accessor))
            .await
    }

    pub fn get_tags(&self, id: &ID) -> HashSet<String> {
        self.fetch.get_tags(id)
    }

    pub fn add_tags(&self, id: &ID, tags: HashSet<String>) {
        self.fetch.add_tags(id, tags);
    }

    pub fn remove_tags(&self, id: &ID, tags: &[String]) {
        self.fetch.remove_tags(id, tags);
    }

    pub fn is_stale(&self, id: &ID) -> bool {
        self.fetch.is_stale(id)
    }

    pub fn remove_entry(&self, id: &ID) {
        self.fetch.remove_entry(id);
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.fetch.get_cache_stats()
    }

    // ---- transactions (forwarded to C5) ----

    /// `transaction(callback, timeout?)` (§4.4). Nested-context
    /// detection is the engine's own responsibility (one active context
    /// per facade, tracked on [`TransactionEngine`]) — this method is a
    /// thin, initialisation-guarded pass-through.
    pub async fn transaction<F, Fut, R>(&self, callback: F, timeout: Option<std::time::Duration>) -> Result<R>
    where
        F: FnOnce(Tx<T, ID>) -> Fut + Send,
        Fut: std::future::Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.ensure_usable()?;
        self.metrics
            .track_operation(OperationKind::Transaction, || self.transactions.transaction(callback, timeout))
            .await
    }

    // ---- memory manager (forwarded to C9, or defaults when unconfigured) ----

    pub fn pin(&self, id: ID) {
        if let Some(memory) = &self.memory {
            memory.pin(id);
        }
    }

    pub fn unpin(&self, id: &ID) {
        if let Some(memory) = &self.memory {
            memory.unpin(id);
        }
    }

    pub fn evict_cache(&self, count: Option<usize>) -> Vec<ID> {
        self.memory.as_ref().map(|m| m.evict(count)).unwrap_or_default()
    }

    pub fn pinned_ids(&self) -> Vec<ID> {
        self.memory.as_ref().map(|m| m.pinned_ids()).unwrap_or_default()
    }

    pub fn memory_metrics(&self) -> Option<MemoryMetricsSnapshot> {
        self.memory.as_ref().map(|m| m.snapshot())
    }

    pub fn memory_pressure_stream(&self) -> Option<impl futures::Stream<Item = PressureLevel> + Send> {
        self.memory.as_ref().map(|m| m.pressure_stream())
    }

    // ---- metrics (C6) ----

    pub fn get_stats(&self) -> AggregatedStats {
        self.metrics.stats()
    }

    pub fn reset_stats(&self) {
        self.metrics.reset_stats();
    }
}
