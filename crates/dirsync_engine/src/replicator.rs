//! The changelog consumer driving a replication run.

use crate::chain::{ChainOutcome, ChainSet, ReplicationContext, ReplicatorEnv};
use crate::checkpoint::CheckpointStore;
use crate::config::{ReplConfig, RetryConfig};
use crate::directory::{ChangelogSource, ChangelogStream, DirectoryConnector, StreamEvent};
use crate::error::{ReplError, ReplResult};
use crate::pool::ConnectionPool;
use crate::queue::{entry_queue, EntryProducer, EntryQueue, QueueEvent, TryEnqueueError};
use dirsync_model::ChangelogEntry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters for a replication run.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    /// Entries whose chain ran to completion (mutation applied or no-op'd).
    pub entries_applied: u64,
    /// Entries whose chain bailed early (replays, absent targets).
    pub entries_skipped: u64,
    /// Times the changelog subscription was re-established.
    pub resubscriptions: u64,
}

impl ReplicationStats {
    /// Total entries taken off the queue.
    pub fn entries_processed(&self) -> u64 {
        self.entries_applied + self.entries_skipped
    }
}

struct Shared {
    shutdown: AtomicBool,
    stats: Mutex<ReplicationStats>,
    failure: Mutex<Option<ReplError>>,
}

impl Shared {
    fn record_failure(&self, err: ReplError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// A running replication: the changelog consumer, its worker, and the
/// process-wide collaborators they share.
///
/// `start` returning `Ok` is the readiness signal: both pools are
/// constructed, the checkpoint is loaded, and the subscription is
/// established strictly after it. Dropping the `Replicator` does not stop
/// the run; call [`shutdown`](Replicator::shutdown) and
/// [`join`](Replicator::join).
pub struct Replicator {
    shared: Arc<Shared>,
    local_pool: Arc<ConnectionPool>,
    remote_pool: Arc<ConnectionPool>,
    producer: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Replicator {
    /// Starts a replication run.
    ///
    /// Reads the checkpoint, subscribes to the changelog strictly after it,
    /// and spawns the producer and worker threads.
    pub fn start(
        config: ReplConfig,
        local: Box<dyn DirectoryConnector>,
        remote: Box<dyn DirectoryConnector>,
        source: Box<dyn ChangelogSource>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> ReplResult<Self> {
        let local_pool = ConnectionPool::new(local, config.pool.clone());
        let remote_pool = ConnectionPool::new(remote, config.pool.clone());

        let resume_after = checkpoint.read()?;
        let stream = source
            .subscribe(resume_after)
            .map_err(|e| ReplError::Subscription(e.to_string()))?;
        info!(
            resume_after = resume_after.unwrap_or(0),
            filter = %config.filter(),
            "changelog subscription established"
        );

        let env = Arc::new(ReplicatorEnv {
            local_pool: Arc::clone(&local_pool),
            remote_pool: Arc::clone(&remote_pool),
            checkpoint: Arc::clone(&checkpoint),
            filter: config.filter(),
            repl_suffix: config.repl_suffix.clone(),
        });

        let shared = Arc::new(Shared {
            shutdown: AtomicBool::new(false),
            stats: Mutex::new(ReplicationStats::default()),
            failure: Mutex::new(None),
        });

        let (producer_tx, queue) = entry_queue(config.queue_capacity);

        let producer = {
            let shared = Arc::clone(&shared);
            let checkpoint = Arc::clone(&checkpoint);
            let poll = config.poll_interval;
            let retry = config.pool.connect_retry.clone();
            std::thread::Builder::new()
                .name("dirsync-producer".into())
                .spawn(move || {
                    run_producer(stream, source, producer_tx, checkpoint, shared, poll, retry)
                })
                .map_err(|e| ReplError::internal(format!("spawn producer: {e}")))?
        };

        let worker = {
            let shared = Arc::clone(&shared);
            let poll = config.poll_interval;
            std::thread::Builder::new()
                .name("dirsync-worker".into())
                .spawn(move || run_worker(queue, env, ChainSet::standard(), shared, poll))
                .map_err(|e| ReplError::internal(format!("spawn worker: {e}")))?
        };

        Ok(Self {
            shared,
            local_pool,
            remote_pool,
            producer: Some(producer),
            worker: Some(worker),
        })
    }

    /// Requests a graceful stop: no further entries are pulled, the
    /// in-flight chain finishes, then both threads exit.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns a snapshot of the run's counters.
    pub fn stats(&self) -> ReplicationStats {
        self.shared.stats.lock().clone()
    }

    /// Returns true once the run has hit a fatal error.
    pub fn has_failed(&self) -> bool {
        self.shared.failure.lock().is_some()
    }

    /// The pool of local directory sessions.
    pub fn local_pool(&self) -> &Arc<ConnectionPool> {
        &self.local_pool
    }

    /// The pool of remote directory sessions.
    pub fn remote_pool(&self) -> &Arc<ConnectionPool> {
        &self.remote_pool
    }

    /// Waits for the run to end and returns its outcome.
    ///
    /// Returns the first fatal error if one stopped the run; the checkpoint
    /// is left at its last durable value either way.
    pub fn join(mut self) -> ReplResult<ReplicationStats> {
        for handle in [self.producer.take(), self.worker.take()].into_iter().flatten() {
            if handle.join().is_err() {
                self.shared
                    .record_failure(ReplError::internal("replication thread panicked"));
            }
        }
        match self.shared.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(self.shared.stats.lock().clone()),
        }
    }
}

/// Drains the changelog subscription into the entry queue.
fn run_producer(
    mut stream: Box<dyn ChangelogStream>,
    source: Box<dyn ChangelogSource>,
    producer: EntryProducer,
    checkpoint: Arc<dyn CheckpointStore>,
    shared: Arc<Shared>,
    poll: Duration,
    retry: RetryConfig,
) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        match stream.next_event(poll) {
            Ok(StreamEvent::Entry(entry)) => {
                debug!(
                    change_number = entry.change_number,
                    target = %entry.target_dn,
                    "changelog entry received"
                );
                if !enqueue_with_backpressure(&producer, entry, &shared) {
                    return;
                }
            }
            Ok(StreamEvent::Idle) => {}
            Ok(StreamEvent::Closed) => {
                info!("changelog feed closed");
                return;
            }
            Err(err) => {
                warn!(error = %err, "changelog stream broke, resubscribing from checkpoint");
                match resubscribe(source.as_ref(), &checkpoint, &shared, &retry) {
                    Some(new_stream) => {
                        stream = new_stream;
                        shared.stats.lock().resubscriptions += 1;
                    }
                    None => return,
                }
            }
        }
    }
}

/// Blocks (politely) until the queue accepts the entry.
///
/// Returns false when the producer should exit instead.
fn enqueue_with_backpressure(
    producer: &EntryProducer,
    entry: ChangelogEntry,
    shared: &Shared,
) -> bool {
    let mut pending = entry;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        match producer.try_enqueue(pending) {
            Ok(()) => return true,
            Err(TryEnqueueError::Full(entry)) => {
                pending = entry;
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(TryEnqueueError::Closed(_)) => return false,
        }
    }
}

/// Re-establishes the subscription from the durable checkpoint.
///
/// Resuming from anything held in memory would lose the crash-consistency
/// guarantee, so the position is re-read from the store every time.
fn resubscribe(
    source: &dyn ChangelogSource,
    checkpoint: &Arc<dyn CheckpointStore>,
    shared: &Shared,
    retry: &RetryConfig,
) -> Option<Box<dyn ChangelogStream>> {
    let mut last_error = None;
    for attempt in 0..retry.max_attempts {
        if shared.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let resume_after = match checkpoint.read() {
            Ok(position) => position,
            Err(err) => {
                shared.record_failure(err);
                return None;
            }
        };
        match source.subscribe(resume_after) {
            Ok(stream) => {
                info!(
                    resume_after = resume_after.unwrap_or(0),
                    "changelog subscription re-established"
                );
                return Some(stream);
            }
            Err(err) => {
                warn!(attempt = attempt + 1, error = %err, "resubscribe failed");
                last_error = Some(err);
            }
        }
    }

    let message = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".into());
    shared.record_failure(ReplError::Subscription(message));
    None
}

/// Drains the entry queue, one handler chain at a time.
fn run_worker(
    queue: EntryQueue,
    env: Arc<ReplicatorEnv>,
    chains: ChainSet,
    shared: Arc<Shared>,
    poll: Duration,
) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        match queue.dequeue_timeout(poll) {
            QueueEvent::Entry(entry) => {
                let chain = chains.chain_for(entry.change_type());
                let mut ctx = ReplicationContext::new(entry);
                match chain.run(&mut ctx, &env) {
                    Ok(ChainOutcome::Completed) => {
                        shared.stats.lock().entries_applied += 1;
                    }
                    Ok(ChainOutcome::Bailed { .. }) => {
                        shared.stats.lock().entries_skipped += 1;
                    }
                    Err(err) => {
                        error!(
                            chain = chain.name(),
                            change_number = ctx.entry.change_number,
                            error = %err,
                            "replication halted"
                        );
                        shared.record_failure(err);
                        return;
                    }
                }
            }
            QueueEvent::Idle => {}
            QueueEvent::Closed => return,
        }
    }
}
