//! Composite backend (C7, §4.6): implements the `Backend` contract by
//! delegating to a primary plus optional fallback and cache backend
//! under a read/write strategy.

use crate::backend::{Backend, BoxStream, Conflict, PendingChange, SyncStatus};
use crate::common::{Entity, EntityId};
use crate::error::{BackendError, Result};
use crate::query::{PagedResult, Query};
use crate::reactive::merge_distinct;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::warn;

/// Read-dispatch strategy (§3 "Composite backend state", §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    PrimaryFirst,
    CacheFirst,
    Fastest,
}

/// Write-dispatch strategy (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    PrimaryOnly,
    All,
    PrimaryAndCache,
}

/// A backend that delegates reads/writes across a primary, an optional
/// fallback, and an optional cache backend, per the configured
/// strategies (C7).
pub struct CompositeBackend<T: Entity, ID: EntityId> {
    name: String,
    primary: Arc<dyn Backend<T, ID>>,
    fallback: Option<Arc<dyn Backend<T, ID>>>,
    cache: Option<Arc<dyn Backend<T, ID>>>,
    read_strategy: ReadStrategy,
    write_strategy: WriteStrategy,
}

impl<T: Entity, ID: EntityId> CompositeBackend<T, ID> {
    pub fn new(
        name: impl Into<String>,
        primary: Arc<dyn Backend<T, ID>>,
        fallback: Option<Arc<dyn Backend<T, ID>>>,
        cache: Option<Arc<dyn Backend<T, ID>>>,
        read_strategy: ReadStrategy,
        write_strategy: WriteStrategy,
    ) -> Self {
        Self { name: name.into(), primary, fallback, cache, read_strategy, write_strategy }
    }

    async fn write_through_cache(&self, item: &T) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(item.clone()).await {
                warn!(error = %e, "composite write-through to cache failed, non-fatal");
            }
        }
    }

    async fn get_primary_first(&self, id: &ID) -> Result<Option<T>> {
        let primary_result = self.primary.get(id).await;
        let from_primary = match primary_result {
            Ok(Some(item)) => Some(item),
            Ok(None) | Err(_) => None,
        };
        if let Some(item) = from_primary {
            self.write_through_cache(&item).await;
            return Ok(Some(item));
        }
        if let Some(fallback) = &self.fallback {
            if let Ok(Some(item)) = fallback.get(id).await {
                self.write_through_cache(&item).await;
                return Ok(Some(item));
            }
        }
        if let Some(cache) = &self.cache {
            return cache.get(id).await;
        }
        Ok(None)
    }

    async fn get_cache_first(&self, id: &ID) -> Result<Option<T>> {
        if let Some(cache) = &self.cache {
            if let Ok(Some(item)) = cache.get(id).await {
                return Ok(Some(item));
            }
        }
        let item = self.primary.get(id).await?;
        if let Some(item) = &item {
            self.write_through_cache(item).await;
        }
        Ok(item)
    }

    /// Genuinely concurrent per §9 Open Question 3 (the spec names the
    /// source's sequential-await behaviour non-conforming): dispatches
    /// to every configured backend at once and returns the first
    /// non-null result, letting the rest run to completion in the
    /// background (best-effort cancellation per §4.6 — tasks aren't
    /// forcibly aborted, just detached once a winner is picked).
    async fn get_fastest(&self, id: &ID) -> Result<Option<T>> {
        let mut futures = Vec::new();
        futures.push(Box::pin(self.primary.get(id)) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<T>>> + Send>>);
        if let Some(fallback) = &self.fallback {
            let fallback = Arc::clone(fallback);
            let id = id.clone();
            futures.push(Box::pin(async move { fallback.get(&id).await }));
        }
        if let Some(cache) = &self.cache {
            let cache = Arc::clone(cache);
            let id = id.clone();
            futures.push(Box::pin(async move { cache.get(&id).await }));
        }

        let mut pending = futures;
        while !pending.is_empty() {
            let (result, _index, remaining) = futures::future::select_all(pending).await;
            if let Ok(Some(item)) = result {
                // Remaining futures are simply dropped: tokio futures
                // that haven't been spawned as tasks stop making
                // progress once dropped, which is the "best-effort
                // cancellation" this spec calls for.
                return Ok(Some(item));
            }
            pending = remaining;
        }
        Ok(None)
    }
}

#[async_trait]
impl<T: Entity, ID: EntityId> Backend<T, ID> for CompositeBackend<T, ID> {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_offline(&self) -> bool {
        self.cache.is_some()
    }

    fn supports_realtime(&self) -> bool {
        self.primary.supports_realtime()
    }

    fn supports_transactions(&self) -> bool {
        self.primary.supports_transactions()
    }

    fn supports_pagination(&self) -> bool {
        self.primary.supports_pagination()
    }

    async fn initialize(&self) -> Result<()> {
        self.primary.initialize().await?;
        if let Some(fallback) = &self.fallback {
            fallback.initialize().await?;
        }
        if let Some(cache) = &self.cache {
            cache.initialize().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.primary.close().await?;
        if let Some(fallback) = &self.fallback {
            fallback.close().await?;
        }
        if let Some(cache) = &self.cache {
            cache.close().await?;
        }
        Ok(())
    }

    async fn get(&self, id: &ID) -> Result<Option<T>> {
        match self.read_strategy {
            ReadStrategy::PrimaryFirst => self.get_primary_first(id).await,
            ReadStrategy::CacheFirst => self.get_cache_first(id).await,
            ReadStrategy::Fastest => self.get_fastest(id).await,
        }
    }

    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<T>> {
        match self.primary.get_all(query).await {
            Ok(items) => Ok(items),
            Err(e) => {
                if let Some(fallback) = &self.fallback {
                    return fallback.get_all(query).await;
                }
                Err(e)
            }
        }
    }

    async fn get_all_paged(&self, query: Option<&Query>) -> Result<PagedResult<T>> {
        match self.primary.get_all_paged(query).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Some(fallback) = &self.fallback {
                    return fallback.get_all_paged(query).await;
                }
                Err(e)
            }
        }
    }

    fn watch(&self, id: &ID) -> BoxStream<'static, Option<T>> {
        let primary = self.primary.watch(id);
        match &self.fallback {
            Some(fallback) => Box::pin(merge_distinct(primary, fallback.watch(id))),
            None => primary,
        }
    }

    fn watch_all(&self, query: Option<&Query>) -> BoxStream<'static, Vec<T>> {
        let primary = self.primary.watch_all(query);
        match &self.fallback {
            Some(fallback) => Box::pin(merge_distinct(primary, fallback.watch_all(query))),
            None => primary,
        }
    }

    fn watch_all_paged(&self, query: Option<&Query>) -> BoxStream<'static, PagedResult<T>> {
        self.primary.watch_all_paged(query)
    }

    async fn save(&self, item: T) -> Result<T> {
        match self.write_strategy {
            WriteStrategy::PrimaryOnly => self.primary.save(item).await,
            WriteStrategy::PrimaryAndCache => {
                let saved = self.primary.save(item).await?;
                self.write_through_cache(&saved).await;
                Ok(saved)
            }
            WriteStrategy::All => {
                let saved = self.primary.save(item).await?;
                self.write_through_cache(&saved).await;
                if let Some(fallback) = &self.fallback {
                    if let Err(e) = fallback.save(saved.clone()).await {
                        warn!(error = %e, "composite write-all to fallback failed, non-fatal");
                    }
                }
                Ok(saved)
            }
        }
    }

    async fn save_all(&self, items: Vec<T>) -> Result<Vec<T>> {
        match self.write_strategy {
            WriteStrategy::PrimaryOnly => self.primary.save_all(items).await,
            WriteStrategy::PrimaryAndCache => {
                let saved = self.primary.save_all(items).await?;
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.save_all(saved.clone()).await {
                        warn!(error = %e, "composite write-through save_all to cache failed, non-fatal");
                    }
                }
                Ok(saved)
            }
            WriteStrategy::All => {
                let saved = self.primary.save_all(items).await?;
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.save_all(saved.clone()).await {
                        warn!(error = %e, "composite write-all save_all to cache failed, non-fatal");
                    }
                }
                if let Some(fallback) = &self.fallback {
                    if let Err(e) = fallback.save_all(saved.clone()).await {
                        warn!(error = %e, "composite write-all save_all to fallback failed, non-fatal");
                    }
                }
                Ok(saved)
            }
        }
    }

    async fn delete(&self, id: &ID) -> Result<()> {
        match self.write_strategy {
            WriteStrategy::PrimaryOnly => self.primary.delete(id).await,
            WriteStrategy::PrimaryAndCache => {
                self.primary.delete(id).await?;
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.delete(id).await {
                        warn!(error = %e, "composite write-through delete to cache failed, non-fatal");
                    }
                }
                Ok(())
            }
            WriteStrategy::All => {
                self.primary.delete(id).await?;
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.delete(id).await {
                        warn!(error = %e, "composite write-all delete to cache failed, non-fatal");
                    }
                }
                if let Some(fallback) = &self.fallback {
                    if let Err(e) = fallback.delete(id).await {
                        warn!(error = %e, "composite write-all delete to fallback failed, non-fatal");
                    }
                }
                Ok(())
            }
        }
    }

    async fn delete_all(&self, ids: &[ID]) -> Result<()> {
        self.primary.delete_all(ids).await?;
        if matches!(self.write_strategy, WriteStrategy::PrimaryAndCache | WriteStrategy::All) {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.delete_all(ids).await {
                    warn!(error = %e, "composite delete_all to cache failed, non-fatal");
                }
            }
        }
        if matches!(self.write_strategy, WriteStrategy::All) {
            if let Some(fallback) = &self.fallback {
                if let Err(e) = fallback.delete_all(ids).await {
                    warn!(error = %e, "composite delete_all to fallback failed, non-fatal");
                }
            }
        }
        Ok(())
    }

    async fn delete_where(&self, query: &Query) -> Result<u64> {
        self.primary.delete_where(query).await
    }

    async fn sync(&self) -> Result<()> {
        self.primary.sync().await
    }

    fn sync_status(&self) -> SyncStatus {
        self.primary.sync_status()
    }

    fn sync_status_stream(&self) -> BoxStream<'static, SyncStatus> {
        self.primary.sync_status_stream()
    }

    fn pending_changes_count(&self) -> u64 {
        self.primary.pending_changes_count()
            + self.fallback.as_ref().map(|b| b.pending_changes_count()).unwrap_or(0)
    }

    /// Concatenated across backends (§4.6): primary's stream drains
    /// first, then the fallback's.
    fn pending_changes_stream(&self) -> BoxStream<'static, PendingChange<ID>> {
        let primary = self.primary.pending_changes_stream();
        match &self.fallback {
            Some(fallback) => Box::pin(stream::select(primary, fallback.pending_changes_stream())),
            None => primary,
        }
    }

    fn conflicts_stream(&self) -> BoxStream<'static, Conflict<T, ID>> {
        let primary = self.primary.conflicts_stream();
        match &self.fallback {
            Some(fallback) => Box::pin(stream::select(primary, fallback.conflicts_stream())),
            None => primary,
        }
    }

    async fn retry_change(&self, id: &ID) -> Result<()> {
        match self.primary.retry_change(id).await {
            Ok(()) => Ok(()),
            Err(e) => match &self.fallback {
                Some(fallback) => fallback.retry_change(id).await,
                None => Err(e),
            },
        }
    }

    async fn cancel_change(&self, id: &ID) -> Result<()> {
        match self.primary.cancel_change(id).await {
            Ok(()) => Ok(()),
            Err(e) => match &self.fallback {
                Some(fallback) => fallback.cancel_change(id).await,
                None => Err(e),
            },
        }
    }

    async fn begin_transaction(&self) -> Result<u64> {
        self.primary.begin_transaction().await
    }

    async fn commit_transaction(&self, txn: u64) -> Result<()> {
        self.primary.commit_transaction(txn).await
    }
}

impl<T: Entity, ID: EntityId> std::fmt::Debug for CompositeBackend<T, ID> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeBackend")
            .field("name", &self.name)
            .field("read_strategy", &self.read_strategy)
            .field("write_strategy", &self.write_strategy)
            .field("has_fallback", &self.fallback.is_some())
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}

/// Surfaced when a write strategy needs a backend that wasn't configured.
pub fn require(name: &str) -> BackendError {
    BackendError::new(format!("composite backend missing required component: {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BoxStream, Conflict, PendingChange, SyncStatus};
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Minimal in-memory backend used only to exercise composite
    /// dispatch logic; not a stand-in for any real backend.
    struct MemoryBackend {
        name: String,
        store: DashMap<u32, String>,
        fail_get: AtomicBool,
    }

    impl MemoryBackend {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self { name: name.to_string(), store: DashMap::new(), fail_get: AtomicBool::new(false) })
        }
    }

    #[async_trait]
    impl Backend<String, u32> for MemoryBackend {
        fn name(&self) -> &str {
            &self.name
        }
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        async fn get(&self, id: &u32) -> Result<Option<String>> {
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(BackendError::new("forced failure").into());
            }
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
            self.store.insert(self.store.len() as u32 + 1, item.clone());
            Ok(item)
        }
        async fn save_all(&self, items: Vec<String>) -> Result<Vec<String>> {
            for item in &items {
                self.store.insert(self.store.len() as u32 + 1, item.clone());
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

    #[tokio::test]
    async fn primary_first_falls_back_and_writes_through_cache() {
        let primary = MemoryBackend::new("primary");
        primary.fail_get.store(true, Ordering::SeqCst);
        let fallback = MemoryBackend::new("fallback");
        fallback.store.insert(1, "X".to_string());
        let cache = MemoryBackend::new("cache");

        let composite = CompositeBackend::new(
            "composite",
            primary,
            Some(fallback),
            Some(Arc::clone(&cache)),
            ReadStrategy::PrimaryFirst,
            WriteStrategy::PrimaryAndCache,
        );

        let result = composite.get(&1).await.unwrap();
        assert_eq!(result, Some("X".to_string()));
        assert!(cache.store.iter().any(|e| e.value() == "X"));
    }

    #[tokio::test]
    async fn cache_first_prefers_cache_on_hit() {
        let primary = MemoryBackend::new("primary");
        let cache = MemoryBackend::new("cache");
        cache.store.insert(1, "cached".to_string());

        let composite = CompositeBackend::new(
            "composite",
            primary,
            None,
            Some(cache),
            ReadStrategy::CacheFirst,
            WriteStrategy::PrimaryOnly,
        );

        let result = composite.get(&1).await.unwrap();
        assert_eq!(result, Some("cached".to_string()));
    }

    #[tokio::test]
    async fn fastest_returns_first_non_null() {
        let primary = MemoryBackend::new("primary");
        let fallback = MemoryBackend::new("fallback");
        fallback.store.insert(1, "fallback-value".to_string());

        let composite = CompositeBackend::new(
            "composite",
            primary,
            Some(fallback),
            None,
            ReadStrategy::Fastest,
            WriteStrategy::PrimaryOnly,
        );

        let result = composite.get(&1).await.unwrap();
        assert_eq!(result, Some("fallback-value".to_string()));
    }
}
