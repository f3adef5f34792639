//! The generic connection pool (C2, §4.1): bounded resource arbiter with
//! FIFO waiting, lifetime/idle maintenance, borrow/return validation, and
//! observable metrics.

use crate::backend::{ConnectionFactory, HealthCheck};
use crate::error::PoolError;
use crate::pool::config::PoolConfig;
use crate::pool::metrics::{PoolMetrics, PoolMetricsSnapshot};
use crate::pool::wait_queue::WaitQueue;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout as tokio_timeout;

/// One live, exclusively-owned connection plus its bookkeeping (§3 "Pooled
/// resource record").
struct PooledRecord<R> {
    resource: R,
    created_at: Instant,
    last_borrow: Instant,
    borrow_count: u64,
    healthy: bool,
}

impl<R> PooledRecord<R> {
    fn new(resource: R) -> Self {
        let now = Instant::now();
        Self { resource, created_at: now, last_borrow: now, borrow_count: 0, healthy: true }
    }

    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn idle_duration(&self) -> Duration {
        self.last_borrow.elapsed()
    }

    fn exceeds_lifetime(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| self.age() > max)
    }

    fn exceeds_idle(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|max| self.idle_duration() > max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Lifecycle {
    Uninitialised = 0,
    Initialised = 1,
    Closed = 2,
}

/// An owned, exclusively-borrowed connection. Dropping the handle without
/// calling [`ConnectionPool::release`] returns the resource to the pool
/// automatically on a best-effort basis.
///
/// Carries the full [`PooledRecord`] (not just the bare resource) so that
/// `created_at`/`borrow_count` survive a borrow/return cycle — losing
/// them on every borrow would make `max_lifetime` unenforceable across
/// more than one acquire (§3 "Pooled resource record" derives `age` from
/// creation, not last-return).
pub struct PooledHandle<R: Send + Sync + 'static> {
    record: Option<PooledRecord<R>>,
    pool: Arc<ConnectionPool<R>>,
}

impl<R: Send + Sync + 'static> PooledHandle<R> {
    pub fn get(&self) -> &R {
        &self.record.as_ref().expect("resource taken").resource
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.record.as_mut().expect("resource taken").resource
    }
}

impl<R: Send + Sync + 'static> Drop for PooledHandle<R> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.release_resource(record).await;
            });
        }
    }
}

/// Bounded resource arbiter (C2). Generic over the pooled resource type
/// `R`, which must be safe to hand across task boundaries.
pub struct ConnectionPool<R: Send + Sync + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<R>>,
    health: Option<Arc<dyn HealthCheck<R>>>,
    idle: Mutex<Vec<PooledRecord<R>>>,
    active: std::sync::atomic::AtomicUsize,
    lifecycle: AtomicU8,
    wait_queue: WaitQueue<PooledRecord<R>>,
    metrics: Arc<PoolMetrics>,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: Send + Sync + 'static> ConnectionPool<R> {
    /// Constructs the pool in the `Uninitialised` state; call
    /// [`initialize`](Self::initialize) before the first `acquire`.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory<R>>) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            health: None,
            idle: Mutex::new(Vec::new()),
            active: std::sync::atomic::AtomicUsize::new(0),
            lifecycle: AtomicU8::new(Lifecycle::Uninitialised as u8),
            wait_queue: WaitQueue::new(),
            metrics: Arc::new(PoolMetrics::new()),
            maintenance: Mutex::new(Vec::new()),
        })
    }

    pub fn with_health_check(mut self, health: Arc<dyn HealthCheck<R>>) -> Self {
        self.health = Some(health);
        self
    }

    fn lifecycle(&self) -> Lifecycle {
        match self.lifecycle.load(Ordering::SeqCst) {
            0 => Lifecycle::Uninitialised,
            1 => Lifecycle::Initialised,
            _ => Lifecycle::Closed,
        }
    }

    /// `Uninitialised -> Initialised`. Creates up to `min_connections`
    /// idle records and starts the two background maintenance tasks.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), PoolError> {
        if self.lifecycle() == Lifecycle::Closed {
            return Err(PoolError::PoolClosed);
        }
        let mut created = Vec::new();
        for _ in 0..self.config.min_connections {
            if let Ok(record) = self.try_create().await {
                created.push(record);
            }
        }
        {
            let mut idle = self.idle.lock();
            idle.extend(created);
        }
        self.refresh_metrics();
        self.lifecycle.store(Lifecycle::Initialised as u8, Ordering::SeqCst);
        self.spawn_maintenance();
        Ok(())
    }

    /// Acquire algorithm (§4.1).
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledHandle<R>, PoolError> {
        match self.lifecycle() {
            Lifecycle::Uninitialised => return Err(PoolError::NotInitialised),
            Lifecycle::Closed => return Err(PoolError::PoolClosed),
            Lifecycle::Initialised => {}
        }

        let start = Instant::now();

        // Step 2: LIFO scan over idle records, discarding expired/invalid ones.
        loop {
            let candidate = {
                let mut idle = self.idle.lock();
                idle.pop()
            };
            let Some(record) = candidate else { break };

            if record.exceeds_lifetime(self.config.max_lifetime) {
                self.destroy(record).await;
                continue;
            }
            if self.config.test_on_borrow && !self.factory.validate(&record.resource).await {
                self.destroy(record).await;
                continue;
            }
            return Ok(Self::activate(self, record, start));
        }

        // Step 3: create a new one if under max_connections.
        let total = self.active.load(Ordering::SeqCst) + self.idle.lock().len();
        if total < self.config.max_connections {
            if let Ok(record) = self.try_create().await {
                // `activate` is the single acquire-time recording site;
                // recording here too would double-count this acquire
                // into the rolling window's mean.
                return Ok(Self::activate(self, record, start));
            }
        }

        // Step 4: enqueue and wait.
        let ticket = self.wait_queue.enqueue();
        self.refresh_metrics();
        let remaining = self.config.acquire_timeout.saturating_sub(start.elapsed());

        match tokio_timeout(remaining, ticket.rx).await {
            Ok(Ok(Ok(record))) => Ok(Self::activate(self, record, start)),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_recv_dropped)) => Err(PoolError::PoolClosed),
            Err(_elapsed) => {
                ticket.timed_out.store(true, Ordering::SeqCst);
                self.wait_queue.remove(ticket.id);
                Err(PoolError::AcquireTimeout(self.config.acquire_timeout))
            }
        }
    }

    /// Runs `op` against a pooled connection and returns the connection
    /// automatically afterwards, whether `op` succeeds or fails.
    pub async fn with_connection<F, Fut, T>(self: &Arc<Self>, op: F) -> Result<T, PoolError>
    where
        F: FnOnce(&R) -> Fut,
        Fut: Future<Output = Result<T, PoolError>>,
    {
        let handle = self.acquire().await?;
        op(handle.get()).await
    }

    /// Explicit release, per the public surface in §4.1. Equivalent to
    /// dropping the handle, spelled out for callers that want a
    /// synchronous completion signal.
    pub async fn release(self: &Arc<Self>, mut handle: PooledHandle<R>) {
        if let Some(record) = handle.record.take() {
            self.release_resource(record).await;
        }
    }

    async fn release_resource(self: &Arc<Self>, record: PooledRecord<R>) {
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.lifecycle() == Lifecycle::Closed {
            self.destroy(record).await;
            self.refresh_metrics();
            return;
        }

        if self.config.test_on_return && !self.factory.validate(&record.resource).await {
            self.destroy(record).await;
            self.refresh_metrics();
            return;
        }

        // A close() racing this point must not leak the resource: recheck
        // after the (possibly awaited) validate above (§9 Open Question 2).
        if self.lifecycle() == Lifecycle::Closed {
            self.destroy(record).await;
            self.refresh_metrics();
            return;
        }

        match self.wait_queue.try_hand_off(record) {
            // The waiter's own `activate` (run from its `acquire` call)
            // accounts for the hand-off; re-incrementing here would
            // double-count `active` for every hand-off.
            None => {}
            Some(mut record) => {
                record.last_borrow = Instant::now();
                self.idle.lock().push(record);
            }
        }
        self.refresh_metrics();
    }

    /// `-> Closed` from any state; cancels maintenance, rejects all
    /// waiters, and destroys every live record.
    pub async fn close(self: &Arc<Self>) {
        self.lifecycle.store(Lifecycle::Closed as u8, Ordering::SeqCst);
        for handle in self.maintenance.lock().drain(..) {
            handle.abort();
        }
        self.wait_queue.reject_all();
        let idle: Vec<_> = self.idle.lock().drain(..).collect();
        for record in idle {
            self.destroy(record).await;
        }
        self.refresh_metrics();
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn activate(pool: &Arc<Self>, mut record: PooledRecord<R>, acquire_start: Instant) -> PooledHandle<R> {
        record.last_borrow = Instant::now();
        record.borrow_count += 1;
        pool.active.fetch_add(1, Ordering::SeqCst);
        pool.metrics.record_acquire_time(acquire_start.elapsed());
        pool.refresh_metrics();
        PooledHandle { record: Some(record), pool: Arc::clone(pool) }
    }

    async fn try_create(&self) -> Result<PooledRecord<R>, PoolError> {
        match self.factory.create().await {
            Ok(resource) => {
                self.metrics.record_created();
                Ok(PooledRecord::new(resource))
            }
            Err(e) => Err(PoolError::ConnectionError(e.to_string())),
        }
    }

    async fn destroy(&self, record: PooledRecord<R>) {
        self.factory.destroy(record.resource).await;
        self.metrics.record_destroyed();
    }

    fn refresh_metrics(&self) {
        self.metrics.set_idle(self.idle.lock().len());
        self.metrics.set_active(self.active.load(Ordering::SeqCst));
        self.metrics.set_waiting(self.wait_queue.len());
    }

    fn spawn_maintenance(self: &Arc<Self>) {
        let health_handle = {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.health_check_loop().await })
        };
        let trim_handle = {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.idle_trim_loop().await })
        };
        self.maintenance.lock().extend([health_handle, trim_handle]);
    }

    async fn health_check_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.health_check_interval);
        loop {
            interval.tick().await;
            if self.lifecycle() == Lifecycle::Closed {
                return;
            }
            self.run_health_check().await;
        }
    }

    async fn run_health_check(&self) {
        let Some(health) = &self.health else { return };
        let snapshot: Vec<PooledRecord<R>> = {
            let mut idle = self.idle.lock();
            std::mem::take(&mut *idle)
        };

        let mut survivors = Vec::with_capacity(snapshot.len());
        for mut record in snapshot {
            if health.is_healthy(&record.resource).await {
                survivors.push(record);
                continue;
            }
            if health.reset(&mut record.resource).await {
                record.healthy = true;
                survivors.push(record);
            } else {
                self.destroy(record).await;
            }
        }
        self.idle.lock().extend(survivors);

        // Top up to min_connections after the sweep.
        let total = self.active.load(Ordering::SeqCst) + self.idle.lock().len();
        for _ in total..self.config.min_connections {
            if let Ok(record) = self.try_create().await {
                self.idle.lock().push(record);
            } else {
                break;
            }
        }
        self.refresh_metrics();
    }

    async fn idle_trim_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.idle_trim_interval);
        loop {
            interval.tick().await;
            if self.lifecycle() == Lifecycle::Closed {
                return;
            }
            self.run_idle_trim().await;
        }
    }

    async fn run_idle_trim(&self) {
        loop {
            let over_min = {
                let idle = self.idle.lock();
                idle.len() > self.config.min_connections
            };
            if !over_min {
                break;
            }
            let oldest = {
                let mut idle = self.idle.lock();
                // Oldest idle = the one least-recently returned, at the
                // front of the LIFO stack.
                if idle.is_empty() {
                    None
                } else {
                    Some(idle.remove(0))
                }
            };
            let Some(record) = oldest else { break };
            if record.exceeds_idle(self.config.idle_timeout) {
                self.destroy(record).await;
            } else {
                self.idle.lock().insert(0, record);
                break;
            }
        }
        self.refresh_metrics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CrateResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingFactory {
        counter: AtomicU32,
    }

    #[async_trait]
    impl ConnectionFactory<u32> for CountingFactory {
        async fn create(&self) -> CrateResult<u32> {
            Ok(self.counter.fetch_add(1, Ordering::SeqCst))
        }
        async fn destroy(&self, _resource: u32) {}
        async fn validate(&self, _resource: &u32) -> bool {
            true
        }
    }

    fn test_pool(min: usize, max: usize) -> Arc<ConnectionPool<u32>> {
        let config = PoolConfig {
            min_connections: min,
            max_connections: max,
            acquire_timeout: Duration::from_millis(100),
            max_lifetime: None,
            idle_timeout: None,
            test_on_borrow: false,
            test_on_return: false,
            health_check_interval: Duration::from_secs(3600),
            idle_trim_interval: Duration::from_secs(3600),
        };
        let factory = Arc::new(CountingFactory { counter: AtomicU32::new(0) });
        Arc::new(ConnectionPool::new(config, factory).unwrap())
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = test_pool(1, 2);
        pool.initialize().await.unwrap();

        let _h1 = pool.acquire().await.unwrap();
        let _h2 = pool.acquire().await.unwrap();

        let start = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn release_hands_off_to_waiting_acquirer() {
        let pool = test_pool(1, 1);
        pool.initialize().await.unwrap();

        let h1 = pool.acquire().await.unwrap();
        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { pool2.acquire().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.release(h1).await;

        let handed = waiter.await.unwrap().unwrap();
        assert!(handed.get() < &u32::MAX);
    }

    #[tokio::test]
    async fn acquire_before_initialize_fails() {
        let pool = test_pool(1, 1);
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::NotInitialised));
    }

    #[tokio::test]
    async fn lifo_reuse_respects_max_lifetime_across_release() {
        let config = PoolConfig {
            min_connections: 0,
            max_connections: 2,
            acquire_timeout: Duration::from_millis(100),
            max_lifetime: Some(Duration::from_millis(20)),
            idle_timeout: None,
            test_on_borrow: false,
            test_on_return: false,
            health_check_interval: Duration::from_secs(3600),
            idle_trim_interval: Duration::from_secs(3600),
        };
        let factory = Arc::new(CountingFactory { counter: AtomicU32::new(0) });
        let pool = Arc::new(ConnectionPool::new(config, factory).unwrap());
        pool.initialize().await.unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let b_value = *b.get();

        pool.release(a).await;
        pool.release(b).await;

        // LIFO: the most recently released (b) comes back first, and it
        // must be the very same record (not a freshly created one).
        let reused = pool.acquire().await.unwrap();
        assert_eq!(*reused.get(), b_value);
        pool.release(reused).await;

        // Age the now-idle record past max_lifetime, then force it out
        // by acquiring again: it must be discarded and replaced.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let fresh = pool.acquire().await.unwrap();
        assert_ne!(*fresh.get(), b_value);
    }
}
