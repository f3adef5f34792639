//! Memory manager (C9, §4.5): LRU eviction, pinning, and pressure-level
//! reporting over an estimated-bytes budget.

use crate::common::EntityId;
use crate::reactive::ReplayCell;
use dashmap::DashMap;
use futures::Stream;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Instant;

/// Qualitative bucket over `current_estimated_bytes / max_bytes` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    None,
    Light,
    Moderate,
    Severe,
}

impl PressureLevel {
    fn from_fraction(fraction: f64) -> Self {
        if fraction >= 0.95 {
            Self::Severe
        } else if fraction >= 0.8 {
            Self::Moderate
        } else if fraction >= 0.6 {
            Self::Light
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    estimated_bytes: usize,
    last_access: Instant,
}

/// Configuration for the memory manager.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub max_bytes: usize,
    pub eviction_batch_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_bytes: 64 * 1024 * 1024, eviction_batch_size: 32 }
    }
}

/// Callback invoked with the ids evicted in one pass, so the owning
/// fetch-policy handler can drop the corresponding cache entries (§4.5
/// "removal notifies the fetch handler").
pub type EvictionListener<ID> = Box<dyn Fn(&[ID]) + Send + Sync>;

pub struct MemoryManager<ID: EntityId> {
    config: MemoryConfig,
    tracked: DashMap<ID, Tracked>,
    pinned: DashMap<ID, ()>,
    current_bytes: AtomicI64,
    pressure: ReplayCell<PressureLevel>,
    evicted_total: AtomicUsize,
    listener: parking_lot::Mutex<Option<EvictionListener<ID>>>,
}

impl<ID: EntityId> MemoryManager<ID> {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            tracked: DashMap::new(),
            pinned: DashMap::new(),
            current_bytes: AtomicI64::new(0),
            pressure: ReplayCell::new(PressureLevel::None),
            evicted_total: AtomicUsize::new(0),
            listener: parking_lot::Mutex::new(None),
        }
    }

    pub fn set_eviction_listener(&self, listener: EvictionListener<ID>) {
        *self.listener.lock() = Some(listener);
    }

    fn refresh_pressure(&self) {
        let current = self.current_bytes.load(Ordering::Relaxed).max(0) as usize;
        let fraction = current as f64 / self.config.max_bytes as f64;
        self.pressure.set(PressureLevel::from_fraction(fraction));
    }

    pub fn record_item(&self, id: ID, estimated_bytes: usize) {
        let previous = self.tracked.insert(
            id,
            Tracked { estimated_bytes, last_access: Instant::now() },
        );
        let delta = estimated_bytes as i64 - previous.map(|p| p.estimated_bytes as i64).unwrap_or(0);
        self.current_bytes.fetch_add(delta, Ordering::Relaxed);
        self.refresh_pressure();
    }

    pub fn record_access(&self, id: &ID) {
        if let Some(mut entry) = self.tracked.get_mut(id) {
            entry.last_access = Instant::now();
        }
    }

    pub fn remove_item(&self, id: &ID) {
        if let Some((_, removed)) = self.tracked.remove(id) {
            self.current_bytes.fetch_sub(removed.estimated_bytes as i64, Ordering::Relaxed);
            self.refresh_pressure();
        }
        self.pinned.remove(id);
    }

    pub fn pin(&self, id: ID) {
        self.pinned.insert(id, ());
    }

    pub fn unpin(&self, id: &ID) {
        self.pinned.remove(id);
    }

    pub fn is_pinned(&self, id: &ID) -> bool {
        self.pinned.contains_key(id)
    }

    /// Evicts up to `count` (default `eviction_batch_size`) unpinned ids
    /// in ascending `last_access` order (LRU), notifying the registered
    /// listener with the evicted set.
    pub fn evict(&self, count: Option<usize>) -> Vec<ID> {
        let count = count.unwrap_or(self.config.eviction_batch_size);
        let mut candidates: Vec<(ID, Instant)> = self
            .tracked
            .iter()
            .filter(|entry| !self.pinned.contains_key(entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().last_access))
            .collect();
        candidates.sort_by_key(|(_, last_access)| *last_access);
        candidates.truncate(count);

        let evicted: Vec<ID> = candidates.into_iter().map(|(id, _)| id).collect();
        for id in &evicted {
            self.remove_item(id);
        }
        self.evicted_total.fetch_add(evicted.len(), Ordering::Relaxed);
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(&evicted);
        }
        evicted
    }

    /// Removes every unpinned id in one sweep.
    pub fn evict_unpinned(&self) -> Vec<ID> {
        let total_unpinned = self.tracked.len();
        self.evict(Some(total_unpinned))
    }

    pub fn metrics_stream(&self) -> impl Stream<Item = PressureLevel> + Send {
        // The spec names `metrics_stream` alongside `pressure_stream`;
        // both observe the same pressure signal here since no separate
        // byte-count stream is specified beyond pressure transitions.
        self.pressure.subscribe()
    }

    pub fn pressure_stream(&self) -> impl Stream<Item = PressureLevel> + Send {
        self.pressure.subscribe()
    }

    pub fn current_pressure(&self) -> PressureLevel {
        self.pressure.get()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn pinned_ids(&self) -> Vec<ID> {
        self.pinned.iter().map(|e| e.key().clone()).collect()
    }

    pub fn snapshot(&self) -> MemoryMetricsSnapshot {
        MemoryMetricsSnapshot {
            current_bytes: self.current_bytes(),
            max_bytes: self.config.max_bytes,
            pressure: self.current_pressure(),
            tracked_count: self.tracked_count(),
            pinned_count: self.pinned.len(),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the memory manager's state, returned by the
/// store facade's `memory_metrics` (§4.7).
#[derive(Debug, Clone)]
pub struct MemoryMetricsSnapshot {
    pub current_bytes: usize,
    pub max_bytes: usize,
    pub pressure: PressureLevel,
    pub tracked_count: usize,
    pub pinned_count: usize,
    pub evicted_total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_crosses_thresholds() {
        let mgr: MemoryManager<u32> = MemoryManager::new(MemoryConfig { max_bytes: 100, eviction_batch_size: 4 });
        mgr.record_item(1, 50);
        assert_eq!(mgr.current_pressure(), PressureLevel::None);
        mgr.record_item(2, 35);
        assert_eq!(mgr.current_pressure(), PressureLevel::Moderate);
        mgr.record_item(3, 20);
        assert_eq!(mgr.current_pressure(), PressureLevel::Severe);
    }

    #[test]
    fn eviction_skips_pinned_and_is_lru_ordered() {
        let mgr: MemoryManager<u32> = MemoryManager::new(MemoryConfig { max_bytes: 1000, eviction_batch_size: 10 });
        mgr.record_item(1, 10);
        std::thread::sleep(std::time::Duration::from_millis(2));
        mgr.record_item(2, 10);
        std::thread::sleep(std::time::Duration::from_millis(2));
        mgr.record_item(3, 10);
        mgr.pin(1);

        let evicted = mgr.evict(Some(2));
        assert_eq!(evicted, vec![2, 3]);
        assert!(mgr.is_pinned(&1));
    }
}
