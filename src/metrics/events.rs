//! Immutable metric event records (§3 "Operation metric, cache metric,
//! sync metric, error metric") and the aggregated-stats counters they
//! roll up into.

use std::time::{Duration, Instant};

/// Which facade operation a metric event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Get,
    GetAll,
    Save,
    SaveAll,
    Delete,
    DeleteAll,
    DeleteWhere,
    Transaction,
    Sync,
    Invalidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    Failure,
}

/// One facade call, timed and outcome-tagged (§3).
#[derive(Debug, Clone)]
pub struct OperationMetric {
    pub kind: OperationKind,
    pub started_at: Instant,
    pub outcome: OperationOutcome,
    pub duration: Option<Duration>,
    pub item_count: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheMetric {
    pub at: Instant,
    pub outcome: CacheOutcome,
}

#[derive(Debug, Clone)]
pub struct SyncMetric {
    pub at: Instant,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone)]
pub struct ErrorMetric {
    pub at: Instant,
    pub kind: OperationKind,
    pub message: String,
    pub stack_trace: Option<String>,
}

/// Per-operation counts and total durations (for a running mean), cache
/// hit/miss counters, sync success/failure counters, the error counter,
/// and the instant of the last update (§3 "Aggregated stats").
#[derive(Debug, Clone, Default)]
pub struct AggregatedStats {
    pub operation_counts: std::collections::HashMap<String, u64>,
    pub operation_total_duration: std::collections::HashMap<String, Duration>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub sync_successes: u64,
    pub sync_failures: u64,
    pub error_count: u64,
    pub last_update: Option<Instant>,
}

impl AggregatedStats {
    fn kind_key(kind: OperationKind) -> &'static str {
        match kind {
            OperationKind::Get => "get",
            OperationKind::GetAll => "get_all",
            OperationKind::Save => "save",
            OperationKind::SaveAll => "save_all",
            OperationKind::Delete => "delete",
            OperationKind::DeleteAll => "delete_all",
            OperationKind::DeleteWhere => "delete_where",
            OperationKind::Transaction => "transaction",
            OperationKind::Sync => "sync",
            OperationKind::Invalidate => "invalidate",
        }
    }

    /// Every successful call increments exactly one operation count;
    /// every failure increments exactly one operation count and the
    /// error count (§8 "Metrics counting" invariant).
    pub fn record_operation(&mut self, kind: OperationKind, success: bool, duration: Option<Duration>) {
        let key = Self::kind_key(kind);
        *self.operation_counts.entry(key.to_string()).or_insert(0) += 1;
        if let Some(d) = duration {
            *self.operation_total_duration.entry(key.to_string()).or_insert(Duration::ZERO) += d;
        }
        if !success {
            self.error_count += 1;
        }
        self.last_update = Some(Instant::now());
    }

    pub fn record_cache(&mut self, outcome: CacheOutcome) {
        match outcome {
            CacheOutcome::Hit => self.cache_hits += 1,
            CacheOutcome::Miss => self.cache_misses += 1,
        }
        self.last_update = Some(Instant::now());
    }

    pub fn record_sync(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Success => self.sync_successes += 1,
            SyncOutcome::Failure => self.sync_failures += 1,
        }
        self.last_update = Some(Instant::now());
    }

    /// Mean duration recorded for `kind`, or `Duration::ZERO` if none.
    pub fn mean_duration(&self, kind: OperationKind) -> Duration {
        let key = Self::kind_key(kind);
        let count = self.operation_counts.get(key).copied().unwrap_or(0);
        if count == 0 {
            return Duration::ZERO;
        }
        self.operation_total_duration.get(key).copied().unwrap_or(Duration::ZERO) / count as u32
    }
}

/// Configuration read by the store facade's `track_operation` wrapper
/// (§4.8).
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Uniform-random draw threshold in `[0, 1]` deciding whether an
    /// event is forwarded to the reporter. Aggregated counting always
    /// happens regardless (§9 Open Question 1).
    pub sample_rate: f64,
    pub include_stack_traces: bool,
    pub track_timing: bool,
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            include_stack_traces: false,
            track_timing: true,
            buffer_capacity: 256,
            flush_interval: Duration::from_secs(10),
        }
    }
}
