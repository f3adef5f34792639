//! FIFO waiting queue for the connection pool (§3 "Waiting request", §4.1
//! acquire step 4, §5 ordering guarantees).

use crate::error::PoolError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

struct WaitEntry<R> {
    id: u64,
    tx: oneshot::Sender<Result<R, PoolError>>,
    timed_out: Arc<AtomicBool>,
}

/// A handle an `acquire` caller holds while its request sits in the
/// queue: the receiving half of the one-shot signal plus the shared
/// timed-out flag it shares with the queue (§3 "Waiting request").
pub struct Ticket<R> {
    pub id: u64,
    pub rx: oneshot::Receiver<Result<R, PoolError>>,
    pub timed_out: Arc<AtomicBool>,
}

/// Strictly FIFO wait queue: the oldest live (non-timed-out) waiter is
/// always served first (§5 ordering guarantees).
pub struct WaitQueue<R> {
    entries: Mutex<VecDeque<WaitEntry<R>>>,
    next_id: AtomicU64,
}

impl<R> Default for WaitQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> WaitQueue<R> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::new()), next_id: AtomicU64::new(1) }
    }

    /// Enqueue a new waiter at the tail of the queue.
    pub fn enqueue(&self) -> Ticket<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let timed_out = Arc::new(AtomicBool::new(false));
        self.entries.lock().push_back(WaitEntry { id, tx, timed_out: Arc::clone(&timed_out) });
        Ticket { id, rx, timed_out }
    }

    /// Remove a waiter from the queue (called after its acquire times out).
    /// Best-effort: if `release` already popped it, this is a no-op.
    pub fn remove(&self, id: u64) {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.id != id);
    }

    /// Hand a freshly-released resource to the first live waiter, scanning
    /// from the head and skipping any already timed-out or abandoned
    /// entry (§4.1 release algorithm). Returns the resource back if no
    /// live waiter was found.
    pub fn try_hand_off(&self, mut resource: R) -> Option<R> {
        loop {
            let entry = {
                let mut entries = self.entries.lock();
                entries.pop_front()
            };
            let entry = match entry {
                Some(e) => e,
                None => return Some(resource),
            };
            if entry.timed_out.load(Ordering::SeqCst) {
                continue;
            }
            match entry.tx.send(Ok(resource)) {
                Ok(()) => return None,
                Err(Ok(returned)) => {
                    // Receiver already dropped (e.g. cancelled future) —
                    // try the next waiter with the same resource.
                    resource = returned;
                    continue;
                }
                Err(Err(_)) => unreachable!("resource hand-off never carries an Err"),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject every waiter currently queued with `PoolClosed` (§4.1 close).
    pub fn reject_all(&self) {
        let mut entries = self.entries.lock();
        while let Some(entry) = entries.pop_front() {
            let _ = entry.tx.send(Err(PoolError::PoolClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let t1 = queue.enqueue();
        let t2 = queue.enqueue();
        assert!(t1.id < t2.id);

        assert!(queue.try_hand_off(1).is_none());
        let got = t1.rx.try_recv().unwrap().unwrap();
        assert_eq!(got, 1);
        assert!(t2.rx.try_recv().is_err());
    }

    #[test]
    fn timed_out_waiter_is_skipped() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let t1 = queue.enqueue();
        let t2 = queue.enqueue();
        t1.timed_out.store(true, Ordering::SeqCst);

        assert!(queue.try_hand_off(7).is_none());
        assert!(t1.rx.try_recv().is_err());
        assert_eq!(t2.rx.try_recv().unwrap().unwrap(), 7);
    }

    #[test]
    fn reject_all_signals_pool_closed() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let t1 = queue.enqueue();
        queue.reject_all();
        assert!(matches!(t1.rx.try_recv().unwrap(), Err(PoolError::PoolClosed)));
    }
}
