//! Transaction engine (C5, §4.4): queued operations, compensating
//! rollback, and nested savepoints.
//!
//! Nested transactions share their root's operation list directly rather
//! than buffering separately and splicing at commit time: a savepoint is
//! simply the index into that shared list at nested-entry, which is all
//! `rollback` needs to drain-and-compensate exactly the nested scope's
//! contribution (§4.4 "savepoint marker... index into a parent
//! transaction's operation list").

use crate::common::{Entity, EntityId, IdExtractor, IdSequence};
use crate::error::{Error, Result, TransactionError};
use crate::backend::SharedBackend;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

/// A queued write, carrying the value needed to compensate it (§3).
#[derive(Debug, Clone)]
pub enum Operation<T, ID> {
    Save { item: T, id: ID, original_value: Option<T>, at: Instant },
    Delete { id: ID, original_value: Option<T>, at: Instant },
}

impl<T, ID> Operation<T, ID> {
    fn id(&self) -> &ID {
        match self {
            Operation::Save { id, .. } => id,
            Operation::Delete { id, .. } => id,
        }
    }
}

struct SharedState<T, ID> {
    operations: Mutex<Vec<Operation<T, ID>>>,
    savepoints: Mutex<Vec<usize>>,
}

/// A running (or just-finished) transaction scope. Top-level when
/// `marker_index == 0` and there is no enclosing context; a nested scope
/// otherwise.
pub struct TransactionContext<T, ID> {
    pub id: u64,
    is_root: bool,
    marker_index: usize,
    shared: Arc<SharedState<T, ID>>,
    committed: AtomicBool,
    rolled_back: AtomicBool,
}

impl<T, ID> TransactionContext<T, ID> {
    fn push(&self, op: Operation<T, ID>) {
        self.shared.operations.lock().push(op);
    }
}

/// Handle passed into the user's transaction callback; queues operations
/// without touching the backend (§4.4).
pub struct Tx<T: Entity, ID: EntityId> {
    ctx: Arc<TransactionContext<T, ID>>,
    backend: SharedBackend<T, ID>,
    id_extractor: IdExtractor<T, ID>,
}

impl<T: Entity, ID: EntityId> Tx<T, ID> {
    pub async fn save(&self, item: T) -> Result<()> {
        let id = (self.id_extractor)(&item);
        let original_value = self.backend.get(&id).await?;
        self.ctx.push(Operation::Save { item, id, original_value, at: Instant::now() });
        Ok(())
    }

    pub async fn save_all(&self, items: Vec<T>) -> Result<()> {
        for item in items {
            self.save(item).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, id: ID) -> Result<()> {
        let original_value = self.backend.get(&id).await?;
        self.ctx.push(Operation::Delete { id, original_value, at: Instant::now() });
        Ok(())
    }

    pub async fn delete_all(&self, ids: Vec<ID>) -> Result<()> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }
}

/// Invoked once per successfully committed top-level transaction, with
/// the final operation list, so the cache layer can issue its
/// post-commit `record_cached_item`/`invalidate` notifications (§4.4).
pub type CommitListener<T, ID> = Box<dyn Fn(&[Operation<T, ID>]) + Send + Sync>;

pub struct TransactionEngine<T: Entity, ID: EntityId> {
    backend: SharedBackend<T, ID>,
    id_extractor: IdExtractor<T, ID>,
    default_timeout: Duration,
    active: Mutex<Option<Arc<TransactionContext<T, ID>>>>,
    ids: IdSequence,
    on_commit: Mutex<Option<CommitListener<T, ID>>>,
}

impl<T: Entity, ID: EntityId> TransactionEngine<T, ID> {
    pub fn new(backend: SharedBackend<T, ID>, id_extractor: IdExtractor<T, ID>, default_timeout: Duration) -> Self {
        Self {
            backend,
            id_extractor,
            default_timeout,
            active: Mutex::new(None),
            ids: IdSequence::new(),
            on_commit: Mutex::new(None),
        }
    }

    pub fn set_commit_listener(&self, listener: CommitListener<T, ID>) {
        *self.on_commit.lock() = Some(listener);
    }

    /// `transaction(callback, timeout?) -> R` (§4.4). A live context on
    /// this engine at call time makes the new scope nested automatically.
    #[instrument(skip_all, fields(txn_id))]
    pub async fn transaction<F, Fut, R>(&self, callback: F, timeout: Option<Duration>) -> Result<R>
    where
        F: FnOnce(Tx<T, ID>) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        let parent = self.active.lock().clone();
        let (shared, marker_index, is_root) = match &parent {
            Some(parent_ctx) => {
                let marker_index = parent_ctx.shared.operations.lock().len();
                parent_ctx.shared.savepoints.lock().push(marker_index);
                (Arc::clone(&parent_ctx.shared), marker_index, false)
            }
            None => (
                Arc::new(SharedState { operations: Mutex::new(Vec::new()), savepoints: Mutex::new(Vec::new()) }),
                0,
                true,
            ),
        };

        let ctx = Arc::new(TransactionContext {
            id: self.ids.next(),
            is_root,
            marker_index,
            shared,
            committed: AtomicBool::new(false),
            rolled_back: AtomicBool::new(false),
        });
        tracing::Span::current().record("txn_id", ctx.id);
        // (note: `record` takes anything implementing `tracing::field::Value`; a bare u64 qualifies)

        *self.active.lock() = Some(Arc::clone(&ctx));
        let tx = Tx { ctx: Arc::clone(&ctx), backend: Arc::clone(&self.backend), id_extractor: Arc::clone(&self.id_extractor) };
        let timeout_duration = timeout.unwrap_or(self.default_timeout);

        let outcome = tokio::time::timeout(timeout_duration, callback(tx)).await;
        *self.active.lock() = parent;

        match outcome {
            Err(_elapsed) => {
                self.rollback(&ctx).await;
                Err(Error::Transaction(TransactionError::timed_out()))
            }
            Ok(Err(e)) => {
                self.rollback(&ctx).await;
                Err(Error::Transaction(TransactionError::aborted(e.to_string())))
            }
            Ok(Ok(value)) => {
                if ctx.is_root {
                    match self.commit_root(&ctx).await {
                        Ok(()) => Ok(value),
                        Err(e) => Err(e),
                    }
                } else {
                    ctx.committed.store(true, Ordering::SeqCst);
                    Ok(value)
                }
            }
        }
    }

    async fn apply(&self, op: &Operation<T, ID>) -> Result<()> {
        match op {
            Operation::Save { item, .. } => {
                self.backend.save(item.clone()).await?;
                Ok(())
            }
            Operation::Delete { id, .. } => self.backend.delete(id).await,
        }
    }

    async fn commit_root(&self, ctx: &Arc<TransactionContext<T, ID>>) -> Result<()> {
        let ops: Vec<Operation<T, ID>> = ctx.shared.operations.lock().clone();

        let native_txn = if self.backend.supports_transactions() {
            Some(self.backend.begin_transaction().await?)
        } else {
            None
        };

        let mut failure = None;
        for op in &ops {
            if let Err(e) = self.apply(op).await {
                failure = Some(e);
                break;
            }
        }

        match (failure, native_txn) {
            (None, Some(txn_id)) => {
                self.backend.commit_transaction(txn_id).await?;
            }
            (None, None) => {}
            (Some(e), _) => {
                self.compensate(&ops).await;
                return Err(Error::Transaction(TransactionError::aborted(e.to_string())));
            }
        }

        ctx.committed.store(true, Ordering::SeqCst);
        if let Some(listener) = self.on_commit.lock().as_ref() {
            listener(&ops);
        }
        Ok(())
    }

    /// Rolls back a scope: drains its own contribution from the shared
    /// operation list (the whole list for a root scope, since its marker
    /// is always 0) and compensates it in reverse.
    async fn rollback(&self, ctx: &Arc<TransactionContext<T, ID>>) {
        let drained: Vec<Operation<T, ID>> = {
            let mut ops = ctx.shared.operations.lock();
            ops.drain(ctx.marker_index..).collect()
        };
        self.compensate(&drained).await;
        ctx.rolled_back.store(true, Ordering::SeqCst);
    }

    /// Undoes `ops` in strictly reverse order, swallowing and logging
    /// per-step failures (§4.4, §7).
    async fn compensate(&self, ops: &[Operation<T, ID>]) {
        for op in ops.iter().rev() {
            let result = match op {
                Operation::Save { original_value: None, id, .. } => self.backend.delete(id).await,
                Operation::Save { original_value: Some(original), .. } => {
                    self.backend.save(original.clone()).await.map(|_| ())
                }
                Operation::Delete { original_value: Some(original), .. } => {
                    self.backend.save(original.clone()).await.map(|_| ())
                }
                Operation::Delete { original_value: None, .. } => Ok(()),
            };
            if let Err(e) = result {
                warn!(error = %e, id = ?op.id(), "compensating rollback step failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BoxStream, Conflict, PendingChange, SyncStatus};
    use crate::error::BackendError;
    use crate::query::{PagedResult, Query};
    use async_trait::async_trait;
    use dashmap::DashMap;

    /// A map-backed `Backend` keyed as `"<id>:<value>"`, just enough
    /// surface to drive the transaction engine's apply/compensate paths
    /// for real (`save`/`delete` actually mutate the map).
    struct MapBackend {
        store: DashMap<u32, String>,
    }

    impl MapBackend {
        fn seeded(pairs: &[(u32, &str)]) -> Arc<Self> {
            let store = DashMap::new();
            for (id, value) in pairs {
                store.insert(*id, value.to_string());
            }
            Arc::new(Self { store })
        }

        fn get_sync(&self, id: u32) -> Option<String> {
            self.store.get(&id).map(|v| v.clone())
        }
    }

    fn split_id(item: &str) -> u32 {
        item.split(':').next().unwrap().parse().unwrap()
    }

    #[async_trait]
    impl Backend<String, u32> for MapBackend {
        fn name(&self) -> &str {
            "map"
        }
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        async fn get(&self, id: &u32) -> Result<Option<String>> {
            Ok(self.store.get(id).map(|v| v.clone()))
        }
        async fn get_all(&self, _query: Option<&Query>) -> Result<Vec<String>> {
            Ok(self.store.iter().map(|e| e.value().clone()).collect())
        }
        fn watch(&self, _id: &u32) -> BoxStream<'static, Option<String>> {
            Box::pin(futures::stream::empty())
        }
        fn watch_all(&self, _query: Option<&Query>) -> BoxStream<'static, Vec<String>> {
            Box::pin(futures::stream::empty())
        }
        async fn save(&self, item: String) -> Result<String> {
            self.store.insert(split_id(&item), item.clone());
            Ok(item)
        }
        async fn save_all(&self, items: Vec<String>) -> Result<Vec<String>> {
            for item in &items {
                self.store.insert(split_id(item), item.clone());
            }
            Ok(items)
        }
        async fn delete(&self, id: &u32) -> Result<()> {
            self.store.remove(id);
            Ok(())
        }
        async fn delete_all(&self, ids: &[u32]) -> Result<()> {
            for id in ids {
                self.store.remove(id);
            }
            Ok(())
        }
        async fn delete_where(&self, _query: &Query) -> Result<u64> {
            Ok(0)
        }
        async fn sync(&self) -> Result<()> {
            Ok(())
        }
        fn sync_status(&self) -> SyncStatus {
            SyncStatus::Idle
        }
        fn sync_status_stream(&self) -> BoxStream<'static, SyncStatus> {
            Box::pin(futures::stream::empty())
        }
        fn pending_changes_count(&self) -> u64 {
            0
        }
        fn pending_changes_stream(&self) -> BoxStream<'static, PendingChange<u32>> {
            Box::pin(futures::stream::empty())
        }
        fn conflicts_stream(&self) -> BoxStream<'static, Conflict<String, u32>> {
            Box::pin(futures::stream::empty())
        }
        async fn retry_change(&self, _id: &u32) -> Result<()> {
            Ok(())
        }
        async fn cancel_change(&self, _id: &u32) -> Result<()> {
            Ok(())
        }
    }

    fn id_extractor() -> IdExtractor<String, u32> {
        Arc::new(|s: &String| split_id(s))
    }

    fn engine(backend: Arc<MapBackend>) -> Arc<TransactionEngine<String, u32>> {
        Arc::new(TransactionEngine::new(backend, id_extractor(), Duration::from_secs(5)))
    }

    /// Scenario 3 (§8): a transaction that saves, deletes, and inserts
    /// then throws before commit must leave the backend exactly as it
    /// was at entry.
    #[tokio::test]
    async fn compensates_save_and_delete_on_callback_error() {
        let backend = MapBackend::seeded(&[(1, "1:old"), (3, "3:x")]);
        let engine = engine(Arc::clone(&backend));

        let outcome = engine
            .transaction(
                |tx| async move {
                    tx.save("1:new".to_string()).await?;
                    tx.delete(3).await?;
                    tx.save("2:brand-new".to_string()).await?;
                    Err::<(), Error>(Error::Backend(BackendError::new("forced abort")))
                },
                None,
            )
            .await;

        assert!(outcome.is_err());
        assert_eq!(backend.get_sync(1), Some("1:old".to_string()));
        assert_eq!(backend.get_sync(3), Some("3:x".to_string()));
        assert!(backend.get_sync(2).is_none());
    }

    /// Scenario 4 (§8): an inner transaction that saves `b` and throws
    /// must not affect the outer transaction's later operations; the
    /// outer commits `a` and `c` only.
    #[tokio::test]
    async fn nested_rollback_leaves_outer_operations_intact() {
        let backend = MapBackend::seeded(&[]);
        let engine = engine(Arc::clone(&backend));

        let outer_engine = Arc::clone(&engine);
        let result = engine
            .transaction(
                move |outer| {
                    let inner_engine = Arc::clone(&outer_engine);
                    async move {
                        outer.save("1:a".to_string()).await?;

                        let nested = inner_engine
                            .transaction(
                                |inner| async move {
                                    inner.save("2:b".to_string()).await?;
                                    Err::<(), Error>(Error::Backend(BackendError::new("forced abort")))
                                },
                                None,
                            )
                            .await;
                        assert!(nested.is_err());

                        outer.save("3:c".to_string()).await?;
                        Ok(())
                    }
                },
                None,
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(backend.get_sync(1), Some("1:a".to_string()));
        assert_eq!(backend.get_sync(3), Some("3:c".to_string()));
        assert!(backend.get_sync(2).is_none());
    }
}
