//! Pool metrics aggregator (C1, §3 "Pool metrics snapshot").
//!
//! Rolling counters, peak tracking, and an acquire-time window of size
//! 100, emitted on every state transition (§4.1).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const ACQUIRE_WINDOW_SIZE: usize = 100;

/// Point-in-time snapshot of a pool's state, emitted after every mutation.
#[derive(Debug, Clone)]
pub struct PoolMetricsSnapshot {
    pub total: usize,
    pub idle: usize,
    pub active: usize,
    pub waiting: usize,
    pub mean_acquire_time: Duration,
    pub peak_active: usize,
    pub total_created: u64,
    pub total_destroyed: u64,
    pub captured_at: Instant,
}

#[derive(Debug)]
pub struct PoolMetrics {
    idle: AtomicUsize,
    active: AtomicUsize,
    waiting: AtomicUsize,
    peak_active: AtomicUsize,
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
    acquire_window: Mutex<VecDeque<Duration>>,
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self {
            idle: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_destroyed: AtomicU64::new(0),
            acquire_window: Mutex::new(VecDeque::with_capacity(ACQUIRE_WINDOW_SIZE)),
        }
    }

    pub fn set_idle(&self, v: usize) {
        self.idle.store(v, Ordering::Relaxed);
    }

    pub fn set_active(&self, v: usize) {
        self.active.store(v, Ordering::Relaxed);
        self.peak_active.fetch_max(v, Ordering::Relaxed);
    }

    pub fn set_waiting(&self, v: usize) {
        self.waiting.store(v, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroyed(&self) {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquire_time(&self, d: Duration) {
        let mut window = self.acquire_window.lock();
        if window.len() == ACQUIRE_WINDOW_SIZE {
            window.pop_front();
        }
        window.push_back(d);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let idle = self.idle.load(Ordering::Relaxed);
        let active = self.active.load(Ordering::Relaxed);
        let window = self.acquire_window.lock();
        let mean_acquire_time = if window.is_empty() {
            Duration::ZERO
        } else {
            window.iter().sum::<Duration>() / window.len() as u32
        };
        PoolMetricsSnapshot {
            total: idle + active,
            idle,
            active,
            waiting: self.waiting.load(Ordering::Relaxed),
            mean_acquire_time,
            peak_active: self.peak_active.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            captured_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_peak_active_across_fluctuation() {
        let m = PoolMetrics::new();
        m.set_active(3);
        m.set_active(1);
        m.set_active(5);
        m.set_active(2);
        assert_eq!(m.snapshot().peak_active, 5);
    }

    #[test]
    fn acquire_window_caps_at_100_and_means_correctly() {
        let m = PoolMetrics::new();
        for _ in 0..150 {
            m.record_acquire_time(Duration::from_millis(10));
        }
        assert_eq!(m.snapshot().mean_acquire_time, Duration::from_millis(10));
    }
}
