//! Priority handoff between one producer and many worker lanes.
//!
//! Entries are ordered by priority first (poison pills before items) and by
//! insertion sequence second. The queue never holds more than one pending item
//! fetch: [`ItemQueue::put_item`] waits until the queue is empty before
//! enqueueing, which is the backpressure that keeps the producer at most one
//! item ahead of the workers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use pipeline_logging::pipeline_debug;
use tokio::sync::{oneshot, Notify};

/// A not-yet-started fetch of the next item from a source.
pub type DeferredGet<T> = BoxFuture<'static, anyhow::Result<Option<T>>>;

/// What running a deferred get produced, as reported back to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Item,
    Empty,
    Failed,
}

/// Producer-side completion handle for a queued fetch.
///
/// The worker that runs the entry resolves it; draining the queue drops it,
/// which the receiving side observes as cancellation.
#[derive(Debug)]
pub struct FetchHandle {
    tx: oneshot::Sender<FetchOutcome>,
}

impl FetchHandle {
    pub fn new() -> (Self, oneshot::Receiver<FetchOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn resolve(self, outcome: FetchOutcome) {
        // The producer may already have gone away; nothing to report then.
        let _ = self.tx.send(outcome);
    }

    pub fn cancel(self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Poison,
    Item,
}

pub enum EntryKind<T> {
    Item {
        get: DeferredGet<T>,
        handle: Option<FetchHandle>,
    },
    Poison,
}

pub struct QueueEntry<T> {
    priority: Priority,
    sequence: u64,
    kind: EntryKind<T>,
}

impl<T> QueueEntry<T> {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_poison(&self) -> bool {
        matches!(self.kind, EntryKind::Poison)
    }

    pub fn into_kind(self) -> EntryKind<T> {
        self.kind
    }
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap pops the greatest entry, so the ordering is reversed: the
// smallest (priority, sequence) pair compares as the greatest.
impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.sequence).cmp(&(self.priority, self.sequence))
    }
}

struct QueueState<T> {
    entries: BinaryHeap<QueueEntry<T>>,
    next_sequence: u64,
    unfinished_items: usize,
}

impl<T> QueueState<T> {
    fn push(&mut self, priority: Priority, kind: EntryKind<T>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(QueueEntry {
            priority,
            sequence,
            kind,
        });
    }

    fn finish_item(&mut self) {
        assert!(
            self.unfinished_items > 0,
            "item_done called more often than items were queued"
        );
        self.unfinished_items -= 1;
    }
}

pub struct ItemQueue<T> {
    state: Mutex<QueueState<T>>,
    entry_put: Notify,
    worker_event: Notify,
}

impl<T> Default for ItemQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ItemQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: BinaryHeap::new(),
                next_sequence: 0,
                unfinished_items: 0,
            }),
            entry_put: Notify::new(),
            worker_event: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an item fetch once the queue is empty.
    ///
    /// Waits for a worker to take or finish something while any entry is
    /// still queued, then counts the fetch as an unfinished item.
    pub async fn put_item(&self, get: DeferredGet<T>, handle: Option<FetchHandle>) {
        loop {
            let worker_event = self.worker_event.notified();
            tokio::pin!(worker_event);
            worker_event.as_mut().enable();

            {
                let mut state = self.lock();
                if state.entries.is_empty() {
                    state.unfinished_items += 1;
                    state.push(Priority::Item, EntryKind::Item { get, handle });
                    drop(state);
                    self.entry_put.notify_waiters();
                    return;
                }
            }

            worker_event.await;
        }
    }

    /// Enqueue a poison pill ahead of every queued item.
    pub fn put_poison_nowait(&self) {
        self.lock().push(Priority::Poison, EntryKind::Poison);
        self.entry_put.notify_waiters();
    }

    /// Wait for and remove the best entry.
    pub async fn get(&self) -> QueueEntry<T> {
        loop {
            let entry_put = self.entry_put.notified();
            tokio::pin!(entry_put);
            entry_put.as_mut().enable();

            let entry = self.lock().entries.pop();
            if let Some(entry) = entry {
                self.worker_event.notify_waiters();
                return entry;
            }

            entry_put.await;
        }
    }

    /// Mark one previously queued item as fully handled.
    ///
    /// # Panics
    ///
    /// Panics if there is no unfinished item left to account for.
    pub fn item_done(&self) {
        self.lock().finish_item();
        self.worker_event.notify_waiters();
    }

    /// Wait for the next `get` or `item_done` on this queue.
    pub async fn wait_for_worker(&self) {
        self.worker_event.notified().await;
    }

    /// Returns `true` immediately if no item is unfinished, otherwise waits
    /// for the next worker event and returns `false`.
    pub(crate) async fn wait_for_worker_unless_idle(&self) -> bool {
        let worker_event = self.worker_event.notified();
        tokio::pin!(worker_event);
        worker_event.as_mut().enable();

        if self.unfinished_items() == 0 {
            return true;
        }
        worker_event.await;
        false
    }

    /// Discard every queued entry without running it.
    ///
    /// Item entries are accounted as done and their fetch handles cancelled.
    /// Returns the number of entries removed.
    pub fn drain(&self) -> usize {
        let drained: Vec<QueueEntry<T>> = {
            let mut state = self.lock();
            let drained: Vec<_> = state.entries.drain().collect();
            for entry in &drained {
                if !entry.is_poison() {
                    state.finish_item();
                }
            }
            drained
        };

        let count = drained.len();
        for entry in drained {
            if let EntryKind::Item {
                handle: Some(handle),
                ..
            } = entry.kind
            {
                handle.cancel();
            }
        }

        if count > 0 {
            pipeline_debug!("Drained {} queue entries", count);
            self.worker_event.notify_waiters();
        }
        count
    }

    /// Keep the queue drained until `until` completes, then return its output.
    pub async fn drain_until<F: Future>(&self, until: F) -> F::Output {
        tokio::pin!(until);
        loop {
            let entry_put = self.entry_put.notified();
            tokio::pin!(entry_put);
            entry_put.as_mut().enable();

            self.drain();

            tokio::select! {
                output = &mut until => return output,
                _ = entry_put => {}
            }
        }
    }

    pub fn unfinished_items(&self) -> usize {
        self.lock().unfinished_items
    }

    /// Number of queued entries, poison pills included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
