//! Fetch-policy handler (C3, §4.2): freshness tracking, tag index, and
//! policy-directed reads. The cached payload itself always lives in the
//! wrapped [`Backend`] — this handler only tracks *when* an id was last
//! refreshed and which tags it carries.

use crate::backend::{BoxStream, SharedBackend};
use crate::cache::config::{CacheConfig, FetchPolicy};
use crate::cache::stats::{CacheStats, CacheStatsCounters};
use crate::common::{Entity, EntityId, IdExtractor};
use crate::error::Result;
use crate::query::{PagedResult, Query};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// A tracked id's freshness/tag bookkeeping (§3 "Cache entry").
#[derive(Debug, Clone)]
struct FreshnessEntry {
    last_refresh: Option<Instant>,
    tags: HashSet<String>,
    pinned: bool,
}

impl FreshnessEntry {
    fn untracked() -> Self {
        Self { last_refresh: None, tags: HashSet::new(), pinned: false }
    }
}

/// A caller-supplied predicate used by `invalidate_where` to decide
/// whether an item (fetched, unpaged or paged, from the backend) matches
/// a query — generic `T` cannot be introspected by field name, so the
/// caller closes over the query's semantics itself (§4.2).
pub type QueryAccessor<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Freshness tracking, tag index, and policy dispatch over a backend
/// (C3). Holds no payload of its own.
pub struct FetchPolicyHandler<T: Entity, ID: EntityId> {
    backend: SharedBackend<T, ID>,
    config: CacheConfig,
    id_extractor: Option<IdExtractor<T, ID>>,
    entries: DashMap<ID, FreshnessEntry>,
    tag_index: DashMap<String, HashSet<ID>>,
    stats: CacheStatsCounters,
}

impl<T: Entity, ID: EntityId> FetchPolicyHandler<T, ID> {
    pub fn new(
        backend: SharedBackend<T, ID>,
        config: CacheConfig,
        id_extractor: Option<IdExtractor<T, ID>>,
    ) -> Self {
        Self {
            backend,
            config,
            id_extractor,
            entries: DashMap::new(),
            tag_index: DashMap::new(),
            stats: CacheStatsCounters::default(),
        }
    }

    fn effective_policy(&self, policy: Option<FetchPolicy>) -> FetchPolicy {
        policy.unwrap_or(self.config.default_fetch_policy)
    }

    /// `get(id, policy?)` — dispatches per §4.2's policy table. Takes an
    /// `Arc<Self>` receiver because `cache_and_network` spawns a detached
    /// background refresh that needs shared ownership of the handler.
    pub async fn get(self: &Arc<Self>, id: &ID, policy: Option<FetchPolicy>) -> Result<Option<T>> {
        match self.effective_policy(policy) {
            FetchPolicy::CacheOnly => {
                // Never marks the id refreshed — "never mark network".
                let item = self.backend.get(id).await?;
                self.record_hit_or_miss(&item);
                Ok(item)
            }
            FetchPolicy::CacheFirst => {
                if self.is_stale(id) {
                    let item = self.backend.get(id).await?;
                    self.record_cached_item(id.clone(), None);
                    self.record_hit_or_miss(&item);
                    Ok(item)
                } else {
                    self.stats.record_hit();
                    self.backend.get(id).await
                }
            }
            FetchPolicy::NetworkFirst => match self.backend.get(id).await {
                Ok(item) => {
                    self.record_cached_item(id.clone(), None);
                    self.record_hit_or_miss(&item);
                    Ok(item)
                }
                Err(e) => {
                    warn!(error = %e, "network_first refresh failed, falling back to unrefreshed read");
                    self.backend.get(id).await
                }
            },
            FetchPolicy::NetworkOnly => {
                let item = self.backend.get(id).await?;
                self.record_cached_item(id.clone(), None);
                self.record_hit_or_miss(&item);
                Ok(item)
            }
            FetchPolicy::CacheAndNetwork => {
                let item = self.backend.get(id).await?;
                self.record_hit_or_miss(&item);
                self.spawn_background_refresh(id.clone());
                Ok(item)
            }
        }
    }

    fn spawn_background_refresh(self: &Arc<Self>, id: ID) {
        // The refreshed value reaches subscribers through the backend's
        // own `watch` stream once it completes; we only need to update
        // our freshness marker here.
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            match handler.backend.get(&id).await {
                Ok(_) => handler.record_cached_item(id, None),
                Err(e) => warn!(error = %e, "cache_and_network background refresh failed"),
            }
        });
    }

    fn record_hit_or_miss(&self, item: &Option<T>) {
        if item.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
    }

    pub async fn get_all(&self, query: Option<&Query>, policy: Option<FetchPolicy>) -> Result<Vec<T>> {
        let _ = self.effective_policy(policy);
        self.backend.get_all(query).await
    }

    pub fn watch(&self, id: &ID) -> BoxStream<'static, Option<T>> {
        self.backend.watch(id)
    }

    pub fn watch_all(&self, query: Option<&Query>) -> BoxStream<'static, Vec<T>> {
        self.backend.watch_all(query)
    }

    /// Mark `id` as freshly refreshed, optionally (re)setting its tags.
    /// `tags = None` preserves the existing tag set.
    pub fn record_cached_item(&self, id: ID, tags: Option<HashSet<String>>) {
        let now = Some(Instant::now());
        let mut entry = self.entries.entry(id.clone()).or_insert_with(FreshnessEntry::untracked);
        entry.last_refresh = now;
        if let Some(tags) = tags {
            self.reindex_tags(&id, &entry.tags, &tags);
            entry.tags = tags;
        }
    }

    fn reindex_tags(&self, id: &ID, old: &HashSet<String>, new: &HashSet<String>) {
        for removed in old.difference(new) {
            if let Some(mut ids) = self.tag_index.get_mut(removed) {
                ids.remove(id);
            }
        }
        for added in new.difference(old) {
            self.tag_index.entry(added.clone()).or_default().insert(id.clone());
        }
    }

    pub fn invalidate(&self, id: &ID) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.last_refresh = None;
        }
        self.stats.record_invalidation(1);
    }

    pub fn invalidate_all(&self) {
        let count = self.entries.len() as u64;
        for mut entry in self.entries.iter_mut() {
            entry.last_refresh = None;
        }
        self.stats.record_invalidation(count);
    }

    pub fn invalidate_by_tags(&self, tags: &[String]) {
        let mut ids = HashSet::new();
        for tag in tags {
            if let Some(tagged) = self.tag_index.get(tag) {
                ids.extend(tagged.iter().cloned());
            }
        }
        self.invalidate_by_ids(&ids.into_iter().collect::<Vec<_>>());
    }

    pub fn invalidate_by_ids(&self, ids: &[ID]) {
        for id in ids {
            self.invalidate(id);
        }
    }

    /// `invalidate_where` (§4.2, §9 Open Question 4): paged scan when the
    /// backend supports pagination, otherwise an unpaged `get_all` with
    /// in-memory filtering — the chosen semantics for the undocumented
    /// non-paginated case.
    pub async fn invalidate_where(&self, query: &Query, accessor: QueryAccessor<T>) -> Result<u64> {
        let Some(id_extractor) = &self.id_extractor else {
            warn!("invalidate_where called without an id_extractor configured; nothing invalidated");
            return Ok(0);
        };

        let matched: Vec<T> = if self.backend.supports_pagination() {
            let mut items = Vec::new();
            let mut page_query = query.clone();
            loop {
                let PagedResult { items: page, page_info } =
                    self.backend.get_all_paged(Some(&page_query)).await?;
                items.extend(page.into_iter().filter(|item| accessor(item)));
                match page_info.end_cursor {
                    Some(cursor) if page_info.has_next_page => {
                        page_query = page_query.paginate(crate::query::Pagination {
                            first: query.page.as_ref().and_then(|p| p.first),
                            after: Some(cursor),
                            last: None,
                            before: None,
                        });
                    }
                    _ => break,
                }
            }
            items
        } else {
            self.backend
                .get_all(None)
                .await?
                .into_iter()
                .filter(|item| accessor(item))
                .collect()
        };

        let ids: Vec<ID> = matched.iter().map(|item| id_extractor(item)).collect();
        let count = ids.len() as u64;
        self.invalidate_by_ids(&ids);
        Ok(count)
    }

    pub fn get_tags(&self, id: &ID) -> HashSet<String> {
        self.entries.get(id).map(|e| e.tags.clone()).unwrap_or_default()
    }

    pub fn add_tags(&self, id: &ID, tags: HashSet<String>) {
        let mut entry = self.entries.entry(id.clone()).or_insert_with(FreshnessEntry::untracked);
        let old = entry.tags.clone();
        let merged: HashSet<String> = old.union(&tags).cloned().collect();
        self.reindex_tags(id, &old, &merged);
        entry.tags = merged;
    }

    /// Removing every tag from an id keeps the id tracked (§3's tag
    /// invariant note) — only `remove_entry` drops both sides.
    pub fn remove_tags(&self, id: &ID, tags: &[String]) {
        let Some(mut entry) = self.entries.get_mut(id) else { return };
        let old = entry.tags.clone();
        for tag in tags {
            entry.tags.remove(tag);
        }
        let new = entry.tags.clone();
        drop(entry);
        self.reindex_tags(id, &old, &new);
    }

    pub fn is_stale(&self, id: &ID) -> bool {
        match self.entries.get(id) {
            None => true,
            Some(entry) => match entry.last_refresh {
                None => true,
                Some(refreshed) => refreshed.elapsed() >= self.config.stale_duration,
            },
        }
    }

    pub fn is_pinned(&self, id: &ID) -> bool {
        self.entries.get(id).map(|e| e.pinned).unwrap_or(false)
    }

    pub fn remove_entry(&self, id: &ID) {
        if let Some((_, entry)) = self.entries.remove(id) {
            for tag in &entry.tags {
                if let Some(mut ids) = self.tag_index.get_mut(tag) {
                    ids.remove(id);
                }
            }
        }
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len(), self.tag_index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BoxStream, Conflict, PendingChange, SyncStatus};
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::time::Duration;

    struct MapBackend {
        store: DashMap<u32, String>,
    }

    impl MapBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self { store: DashMap::new() })
        }
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
            Ok(item)
        }
        async fn save_all(&self, items: Vec<String>) -> Result<Vec<String>> {
            Ok(items)
        }
        async fn delete(&self, _id: &u32) -> Result<()> {
            Ok(())
        }
        async fn delete_all(&self, _ids: &[u32]) -> Result<()> {
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

    fn handler() -> Arc<FetchPolicyHandler<String, u32>> {
        Arc::new(FetchPolicyHandler::new(
            MapBackend::new(),
            CacheConfig { stale_duration: Duration::from_millis(20), ..CacheConfig::default() },
            None,
        ))
    }

    fn tags(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Scenario 5 (§8): tag-based invalidation only marks ids carrying
    /// the invalidated tag stale; untagged ids are unaffected.
    #[tokio::test]
    async fn invalidate_by_tags_only_marks_tagged_ids_stale() {
        let h = handler();
        h.record_cached_item(1, Some(tags(&["users", "active"])));
        h.record_cached_item(2, Some(tags(&["users"])));
        h.record_cached_item(3, Some(tags(&["active"])));

        assert!(!h.is_stale(&1));
        assert!(!h.is_stale(&2));
        assert!(!h.is_stale(&3));

        h.invalidate_by_tags(&["active".to_string()]);

        assert!(h.is_stale(&1));
        assert!(!h.is_stale(&2));
        assert!(h.is_stale(&3));
    }

    /// Tag invariant (§8): `t in tags(i) <=> i in ids(t)` after adds,
    /// partial removal, and full removal (which keeps the id tracked).
    #[test]
    fn tag_invariant_holds_through_add_and_remove() {
        let h = handler();
        h.record_cached_item(1, Some(tags(&["a", "b"])));
        assert_eq!(h.get_tags(&1), tags(&["a", "b"]));

        h.remove_tags(&1, &["a".to_string()]);
        assert_eq!(h.get_tags(&1), tags(&["b"]));
        assert!(!h.is_pinned(&1));

        h.remove_tags(&1, &["b".to_string()]);
        assert!(h.get_tags(&1).is_empty());
        // Emptying the tag set keeps the id tracked (not stale by tag
        // removal alone) until `remove_entry` drops it entirely.
        assert!(!h.is_stale(&1));

        h.remove_entry(&1);
        assert!(h.is_stale(&1));
    }

    #[tokio::test]
    async fn untracked_id_is_stale_and_cache_only_never_refreshes() {
        let h = handler();
        assert!(h.is_stale(&42));

        let result = h.get(&42, Some(FetchPolicy::CacheOnly)).await.unwrap();
        assert!(result.is_none());
        // cache_only must never mark the id as refreshed.
        assert!(h.is_stale(&42));
    }

    #[tokio::test]
    async fn cache_first_refreshes_once_stale() {
        let h = handler();
        h.record_cached_item(7, None);
        assert!(!h.is_stale(&7));

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(h.is_stale(&7));

        let _ = h.get(&7, Some(FetchPolicy::CacheFirst)).await.unwrap();
        assert!(!h.is_stale(&7));
    }
}
