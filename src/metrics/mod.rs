//! Metrics pipeline (C6, §4.8): operation/cache/sync/error event records,
//! a `Reporter` sink trait with three concrete reporters (noop/console/
//! buffered), and the aggregated-stats counters the facade exposes
//! through `get_stats`/`reset_stats`.

mod events;
mod reporter;

pub use events::{
    AggregatedStats, CacheOutcome, CacheMetric, ErrorMetric, MetricsConfig, OperationKind,
    OperationMetric, OperationOutcome, SyncMetric, SyncOutcome,
};
pub use reporter::{BufferedReporter, ConsoleReporter, NoopReporter, Reporter};

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Owns the configured [`Reporter`] and the unconditional aggregated
/// counters (§9 Open Question 1: counting is unsampled, only external
/// emission is gated by `sample_rate`).
pub struct MetricsPipeline {
    config: MetricsConfig,
    reporter: Arc<dyn Reporter>,
    stats: Mutex<AggregatedStats>,
}

impl MetricsPipeline {
    pub fn new(config: MetricsConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self { config, reporter, stats: Mutex::new(AggregatedStats::default()) }
    }

    fn should_emit(&self) -> bool {
        if self.config.sample_rate >= 1.0 {
            return true;
        }
        if self.config.sample_rate <= 0.0 {
            return false;
        }
        rand::rng().random::<f64>() < self.config.sample_rate
    }

    fn timed_duration(&self, elapsed: Duration) -> Option<Duration> {
        self.config.track_timing.then_some(elapsed)
    }

    /// Wraps one facade call: always updates the aggregated stats, emits
    /// to the reporter only when the sample draw passes (§4.8, §8
    /// "Metrics counting" invariant).
    pub async fn track_operation<F, Fut, R>(&self, kind: OperationKind, work: F) -> crate::error::Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<R>>,
    {
        let start = Instant::now();
        let result = work().await;
        let elapsed = start.elapsed();
        let duration = self.timed_duration(elapsed);

        {
            let mut stats = self.stats.lock();
            stats.record_operation(kind, result.is_ok(), duration);
        }

        if self.should_emit() {
            let metric = OperationMetric {
                kind,
                started_at: start,
                outcome: if result.is_ok() { OperationOutcome::Success } else { OperationOutcome::Failure },
                duration,
                item_count: None,
                error: result.as_ref().err().map(|e| e.to_string()),
            };
            self.reporter.report_operation(metric).await;
            if let Err(e) = &result {
                self.reporter
                    .report_error(ErrorMetric {
                        at: Instant::now(),
                        kind,
                        message: e.to_string(),
                        stack_trace: self.config.include_stack_traces.then(|| format!("{e:?}")),
                    })
                    .await;
            }
        }

        result
    }

    pub fn record_cache(&self, outcome: CacheOutcome) {
        self.stats.lock().record_cache(outcome);
        if self.should_emit() {
            let reporter = Arc::clone(&self.reporter);
            let metric = CacheMetric { at: Instant::now(), outcome };
            tokio::spawn(async move { reporter.report_cache(metric).await });
        }
    }

    pub fn record_sync(&self, outcome: SyncOutcome) {
        self.stats.lock().record_sync(outcome);
        if self.should_emit() {
            let reporter = Arc::clone(&self.reporter);
            let metric = SyncMetric { at: Instant::now(), outcome };
            tokio::spawn(async move { reporter.report_sync(metric).await });
        }
    }

    pub fn stats(&self) -> AggregatedStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = AggregatedStats::default();
    }

    pub async fn dispose(&self) {
        self.reporter.dispose().await;
    }
}
