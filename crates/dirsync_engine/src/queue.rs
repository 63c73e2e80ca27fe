//! The bounded entry queue between producer and worker.

use dirsync_model::ChangelogEntry;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

/// Why a non-blocking enqueue did not accept an entry.
#[derive(Debug)]
pub enum TryEnqueueError {
    /// The queue is at capacity; the entry is handed back.
    Full(ChangelogEntry),
    /// The consumer is gone; the entry is handed back.
    Closed(ChangelogEntry),
}

/// One delivery from [`EntryQueue::dequeue_timeout`].
#[derive(Debug)]
pub enum QueueEvent {
    /// The next entry, in enqueue order.
    Entry(ChangelogEntry),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The producer is gone and the queue is drained.
    Closed,
}

/// The producer half of the entry queue.
pub struct EntryProducer {
    tx: SyncSender<ChangelogEntry>,
}

impl EntryProducer {
    /// Enqueues an entry, blocking while the queue is full.
    ///
    /// Blocking is the backpressure toward a fast changelog producer.
    pub fn enqueue(&self, entry: ChangelogEntry) -> Result<(), TryEnqueueError> {
        self.tx
            .send(entry)
            .map_err(|e| TryEnqueueError::Closed(e.0))
    }

    /// Attempts to enqueue without blocking.
    pub fn try_enqueue(&self, entry: ChangelogEntry) -> Result<(), TryEnqueueError> {
        self.tx.try_send(entry).map_err(|e| match e {
            TrySendError::Full(entry) => TryEnqueueError::Full(entry),
            TrySendError::Disconnected(entry) => TryEnqueueError::Closed(entry),
        })
    }
}

/// The consumer half of the entry queue.
///
/// A single worker drains it, so entries reach the handler chains strictly
/// in enqueue order and at most one chain runs at a time.
pub struct EntryQueue {
    rx: Receiver<ChangelogEntry>,
}

impl EntryQueue {
    /// Waits up to `timeout` for the next entry.
    pub fn dequeue_timeout(&self, timeout: Duration) -> QueueEvent {
        match self.rx.recv_timeout(timeout) {
            Ok(entry) => QueueEvent::Entry(entry),
            Err(RecvTimeoutError::Timeout) => QueueEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => QueueEvent::Closed,
        }
    }
}

/// Creates a bounded entry queue.
pub fn entry_queue(capacity: usize) -> (EntryProducer, EntryQueue) {
    let (tx, rx) = sync_channel(capacity);
    (EntryProducer { tx }, EntryQueue { rx })
}
