//! Reporter sinks (§4.8): `Noop` (zero overhead), `Console` (immediate
//! `tracing` emission), and `Buffered` (bounded buffer, auto-flush on
//! full or on a timer, delegating to a wrapped reporter). Reporter
//! errors are never propagated — every method returns `()` and any
//! internal failure is logged and dropped (§7).

use crate::metrics::events::{CacheMetric, ErrorMetric, OperationMetric, SyncMetric};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A sink for the four metric kinds plus lifecycle hooks. All methods
/// are infallible at the boundary — implementations that can fail must
/// swallow and log internally (§7 "Errors from metrics reporting are
/// always swallowed").
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report_operation(&self, metric: OperationMetric);
    async fn report_cache(&self, metric: CacheMetric);
    async fn report_sync(&self, metric: SyncMetric);
    async fn report_error(&self, metric: ErrorMetric);

    /// Flush any buffered state. Default no-op for reporters that emit
    /// immediately.
    async fn flush(&self) {}

    /// Flush and tear down. Default just flushes.
    async fn dispose(&self) {
        self.flush().await;
    }
}

/// Zero-overhead reporter; const-constructible.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl NoopReporter {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reporter for NoopReporter {
    async fn report_operation(&self, _metric: OperationMetric) {}
    async fn report_cache(&self, _metric: CacheMetric) {}
    async fn report_sync(&self, _metric: SyncMetric) {}
    async fn report_error(&self, _metric: ErrorMetric) {}
}

/// Formats and logs each event immediately via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn report_operation(&self, metric: OperationMetric) {
        info!(
            kind = ?metric.kind,
            outcome = ?metric.outcome,
            duration = ?metric.duration,
            "operation"
        );
    }

    async fn report_cache(&self, metric: CacheMetric) {
        info!(outcome = ?metric.outcome, "cache");
    }

    async fn report_sync(&self, metric: SyncMetric) {
        info!(outcome = ?metric.outcome, "sync");
    }

    async fn report_error(&self, metric: ErrorMetric) {
        warn!(kind = ?metric.kind, message = %metric.message, "error");
    }
}

#[derive(Debug, Clone)]
enum BufferedEvent {
    Operation(OperationMetric),
    Cache(CacheMetric),
    Sync(SyncMetric),
    Error(ErrorMetric),
}

struct BufferedInner {
    delegate: Arc<dyn Reporter>,
    capacity: usize,
    buffer: Mutex<Vec<BufferedEvent>>,
}

impl BufferedInner {
    /// Dispatches each buffered event to its matching delegate method and
    /// finally flushes the delegate itself (§4.8). Re-entrancy safe: the
    /// buffer is drained under the lock before any delegate call runs, so
    /// a `report_*` triggered from inside a delegate call cannot recurse
    /// into this same flush.
    async fn flush(&self) {
        let drained: Vec<BufferedEvent> = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            self.delegate.flush().await;
            return;
        }
        for event in drained {
            match event {
                BufferedEvent::Operation(m) => self.delegate.report_operation(m).await,
                BufferedEvent::Cache(m) => self.delegate.report_cache(m).await,
                BufferedEvent::Sync(m) => self.delegate.report_sync(m).await,
                BufferedEvent::Error(m) => self.delegate.report_error(m).await,
            }
        }
        self.delegate.flush().await;
    }

    fn push(self: &Arc<Self>, event: BufferedEvent) -> bool {
        let mut buffer = self.buffer.lock();
        buffer.push(event);
        buffer.len() >= self.capacity
    }
}

/// Wraps another reporter with a bounded in-memory buffer; auto-flushes
/// on buffer-full or at `flush_interval` (§4.8).
pub struct BufferedReporter {
    inner: Arc<BufferedInner>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedReporter {
    pub fn new(delegate: Arc<dyn Reporter>, capacity: usize, flush_interval: Duration) -> Arc<Self> {
        let inner = Arc::new(BufferedInner { delegate, capacity, buffer: Mutex::new(Vec::new()) });
        let reporter = Arc::new(Self { inner: Arc::clone(&inner), flush_task: Mutex::new(None) });

        let task_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            loop {
                interval.tick().await;
                task_inner.flush().await;
            }
        });
        *reporter.flush_task.lock() = Some(handle);
        reporter
    }

    async fn push_and_maybe_flush(&self, event: BufferedEvent) {
        if self.inner.push(event) {
            self.inner.flush().await;
        }
    }
}

impl Drop for BufferedReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.flush_task.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Reporter for BufferedReporter {
    async fn report_operation(&self, metric: OperationMetric) {
        self.push_and_maybe_flush(BufferedEvent::Operation(metric)).await;
    }

    async fn report_cache(&self, metric: CacheMetric) {
        self.push_and_maybe_flush(BufferedEvent::Cache(metric)).await;
    }

    async fn report_sync(&self, metric: SyncMetric) {
        self.push_and_maybe_flush(BufferedEvent::Sync(metric)).await;
    }

    async fn report_error(&self, metric: ErrorMetric) {
        self.push_and_maybe_flush(BufferedEvent::Error(metric)).await;
    }

    async fn flush(&self) {
        self.inner.flush().await;
    }

    async fn dispose(&self) {
        if let Some(handle) = self.flush_task.lock().take() {
            handle.abort();
        }
        self.inner.flush().await;
        self.inner.delegate.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingReporter {
        operations: AtomicUsize,
        flushes: AtomicUsize,
    }

    #[async_trait]
    impl Reporter for CountingReporter {
        async fn report_operation(&self, _metric: OperationMetric) {
            self.operations.fetch_add(1, Ordering::SeqCst);
        }
        async fn report_cache(&self, _metric: CacheMetric) {}
        async fn report_sync(&self, _metric: SyncMetric) {}
        async fn report_error(&self, _metric: ErrorMetric) {}
        async fn flush(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn op_metric() -> OperationMetric {
        OperationMetric {
            kind: crate::metrics::events::OperationKind::Get,
            started_at: std::time::Instant::now(),
            outcome: crate::metrics::events::OperationOutcome::Success,
            duration: None,
            item_count: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn buffer_full_triggers_auto_flush() {
        let delegate = Arc::new(CountingReporter::default());
        let reporter = BufferedReporter::new(delegate.clone(), 2, Duration::from_secs(3600));

        reporter.report_operation(op_metric()).await;
        assert_eq!(delegate.operations.load(Ordering::SeqCst), 0);
        reporter.report_operation(op_metric()).await;
        assert_eq!(delegate.operations.load(Ordering::SeqCst), 2);
        assert_eq!(delegate.flushes.load(Ordering::SeqCst), 1);
    }
}
