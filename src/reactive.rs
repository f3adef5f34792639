//! Hot, value-replaying reactive sequences (§5, §9).
//!
//! `watch(id)`-style streams need a subscriber to see the current value
//! immediately, then every subsequent distinct change. `tokio::sync::watch`
//! gives exactly that for free (a fresh `Receiver` already holds the
//! current value), so it is the backing primitive here rather than a
//! hand-rolled broadcast-plus-cell combo (§9's re-architecture note leaves
//! that choice to the implementer).

use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::StreamExt;

/// A hot, value-replaying, multi-consumer cell. Writers call [`set`] (or
/// [`update`]); every distinct value is pushed to all live subscribers,
/// with consecutive equal values deduped at the write site.
pub struct ReplayCell<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ReplayCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the current value; subscribers are notified only if the
    /// new value differs from the current one (distinct-until-changed).
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.tx.borrow());
        self.set(next);
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Subscribe — the returned stream immediately yields the current
    /// value, then every subsequent change.
    pub fn subscribe(&self) -> impl futures::Stream<Item = T> + Send {
        WatchStream::new(self.tx.subscribe())
    }
}

/// An append-only, multi-consumer event stream (pending changes,
/// conflicts): new subscribers do **not** see history, only events raised
/// after they subscribe. Distinguished from [`ReplayCell`] per the Open
/// Question recorded in SPEC_FULL.md §5.
pub struct EventBus<T> {
    tx: tokio::sync::broadcast::Sender<T>,
}

impl<T: Clone + Send + Sync + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, value: T) {
        // No live subscribers is not an error: events can be emitted
        // before the first watcher subscribes.
        let _ = self.tx.send(value);
    }

    pub fn subscribe(&self) -> impl futures::Stream<Item = T> + Send
    where
        T: 'static,
    {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|r| r.ok())
    }
}

/// Merge two or three replay-style streams with distinct-value dedup,
/// used by the composite backend's `watch`/`watch_all` (§4.6).
pub fn merge_distinct<T, S1, S2>(a: S1, b: S2) -> impl futures::Stream<Item = T>
where
    T: Clone + PartialEq + Send + 'static,
    S1: futures::Stream<Item = T> + Send + 'static,
    S2: futures::Stream<Item = T> + Send + 'static,
{
    let merged = futures::stream::select(a, b);
    dedup_consecutive(merged)
}

fn dedup_consecutive<T, S>(stream: S) -> impl futures::Stream<Item = T>
where
    T: Clone + PartialEq + Send + 'static,
    S: futures::Stream<Item = T> + Send + 'static,
{
    futures::stream::unfold((stream, None::<T>), |(mut stream, last)| async move {
        let mut last = last;
        loop {
            match futures::StreamExt::next(&mut stream).await {
                Some(item) => {
                    if last.as_ref() == Some(&item) {
                        continue;
                    }
                    last = Some(item.clone());
                    return Some((item, (stream, last)));
                }
                None => return None,
            }
        }
    })
}

/// Shared-ownership convenience: a `ReplayCell` behind an `Arc` is the
/// common shape for per-id cells owned by a handler and handed out to
/// many subscribers.
pub type SharedReplayCell<T> = Arc<ReplayCell<T>>;
