//! Freshness-index statistics (`get_cache_stats`, §4.2).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Invalidated,
    Expired,
    Removed,
}

/// Point-in-time counters for the fetch-policy handler's cache index.
/// Mirrors the pool's metrics-snapshot shape (§3) rather than a
/// Prometheus-style registry — this is an internal stats object, not an
/// exported metric surface.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub tracked_entries: usize,
    pub tracked_tags: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CacheStatsCounters {
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    invalidations: std::sync::atomic::AtomicU64,
}

impl CacheStatsCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, count: u64) {
        self.invalidations.fetch_add(count, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn snapshot(&self, tracked_entries: usize, tracked_tags: usize) -> CacheStats {
        use std::sync::atomic::Ordering::Relaxed;
        CacheStats {
            hits: self.hits.load(Relaxed),
            misses: self.misses.load(Relaxed),
            invalidations: self.invalidations.load(Relaxed),
            tracked_entries,
            tracked_tags,
        }
    }
}
