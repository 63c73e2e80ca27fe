//! Append-only changelog feed with resumable subscriptions.

use dirsync_model::{ChangePayload, ChangelogEntry, DirectoryError, Dn};
use parking_lot::Mutex;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One delivery from a [`ChangelogSubscription`].
#[derive(Debug)]
pub enum FeedEvent {
    /// A changelog entry in change-number order.
    Entry(ChangelogEntry),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The feed was closed; no further entries will arrive.
    Closed,
}

struct Subscriber {
    base: Dn,
    tx: Sender<Result<ChangelogEntry, DirectoryError>>,
}

struct FeedInner {
    entries: Vec<ChangelogEntry>,
    next_change_number: u64,
    subscribers: Vec<Subscriber>,
}

/// An append-only record of directory changes.
///
/// Change numbers are assigned on append and are strictly increasing.
/// Subscribers receive the backlog strictly after their resume position,
/// then live entries as they are recorded, scoped to DNs at or below their
/// base. Attribute-level scoping is the consumer's job.
pub struct MemoryChangelog {
    inner: Mutex<FeedInner>,
}

impl MemoryChangelog {
    /// Creates an empty feed. Change numbers start at 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FeedInner {
                entries: Vec::new(),
                next_change_number: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Records a change, assigning it the next change number.
    ///
    /// Returns the assigned number.
    pub fn record(&self, target_dn: Dn, payload: ChangePayload) -> u64 {
        let mut inner = self.inner.lock();
        let change_number = inner.next_change_number;
        inner.next_change_number += 1;

        let entry = ChangelogEntry {
            change_number,
            target_dn,
            payload,
            timestamp_ms: now_ms(),
        };

        inner.subscribers.retain(|sub| {
            if !entry.target_dn.is_descendant_of(&sub.base) {
                return true;
            }
            sub.tx.send(Ok(entry.clone())).is_ok()
        });
        inner.entries.push(entry);

        change_number
    }

    /// Returns the highest change number recorded so far, 0 when empty.
    pub fn latest_change_number(&self) -> u64 {
        self.inner.lock().next_change_number - 1
    }

    /// Returns all entries with change numbers strictly above `cursor`.
    pub fn entries_after(&self, cursor: u64) -> Vec<ChangelogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.change_number > cursor)
            .cloned()
            .collect()
    }

    /// Opens a subscription scoped to `base`, resuming strictly after
    /// `resume_after` (or from the beginning when `None`).
    pub fn subscribe(&self, resume_after: Option<u64>, base: Dn) -> ChangelogSubscription {
        let (tx, rx) = channel();
        let cursor = resume_after.unwrap_or(0);

        let mut inner = self.inner.lock();
        let mut replayed = 0usize;
        for entry in &inner.entries {
            if entry.change_number > cursor && entry.target_dn.is_descendant_of(&base) {
                // Unbounded sender; only fails if the receiver is gone.
                let _ = tx.send(Ok(entry.clone()));
                replayed += 1;
            }
        }
        debug!(
            base = %base,
            resume_after = cursor,
            replayed,
            "changelog subscription opened"
        );
        inner.subscribers.push(Subscriber { base, tx });

        ChangelogSubscription { rx }
    }

    /// Forcibly disconnects every live subscriber with a connection error.
    ///
    /// Used by tests to simulate the remote stream dropping mid-flight.
    pub fn disconnect_subscribers(&self) {
        let mut inner = self.inner.lock();
        for sub in inner.subscribers.drain(..) {
            let _ = sub
                .tx
                .send(Err(DirectoryError::Connection("stream dropped".into())));
        }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl Default for MemoryChangelog {
    fn default() -> Self {
        Self::new()
    }
}

/// A live, ordered subscription to a [`MemoryChangelog`].
pub struct ChangelogSubscription {
    rx: Receiver<Result<ChangelogEntry, DirectoryError>>,
}

impl ChangelogSubscription {
    /// Waits up to `timeout` for the next event.
    pub fn next_event(&self, timeout: Duration) -> Result<FeedEvent, DirectoryError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(entry)) => Ok(FeedEvent::Entry(entry)),
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Ok(FeedEvent::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(FeedEvent::Closed),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_model::Attributes;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn record_add(feed: &MemoryChangelog, target: &str) -> u64 {
        feed.record(dn(target), ChangePayload::Add(Attributes::new()))
    }

    #[test]
    fn change_numbers_are_monotonic() {
        let feed = MemoryChangelog::new();
        assert_eq!(feed.latest_change_number(), 0);

        let first = record_add(&feed, "cn=a, o=example");
        let second = record_add(&feed, "cn=b, o=example");
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(feed.latest_change_number(), 2);
    }

    #[test]
    fn subscription_replays_backlog_after_cursor() {
        let feed = MemoryChangelog::new();
        for i in 0..5 {
            record_add(&feed, &format!("cn=e{i}, o=example"));
        }

        let sub = feed.subscribe(Some(3), dn("o=example"));
        let first = sub.next_event(Duration::from_millis(50)).unwrap();
        let second = sub.next_event(Duration::from_millis(50)).unwrap();
        let third = sub.next_event(Duration::from_millis(50)).unwrap();

        match (first, second, third) {
            (FeedEvent::Entry(a), FeedEvent::Entry(b), FeedEvent::Idle) => {
                assert_eq!(a.change_number, 4);
                assert_eq!(b.change_number, 5);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn subscription_receives_live_entries() {
        let feed = MemoryChangelog::new();
        let sub = feed.subscribe(None, dn("o=example"));

        record_add(&feed, "cn=live, o=example");
        match sub.next_event(Duration::from_millis(50)).unwrap() {
            FeedEvent::Entry(entry) => assert_eq!(entry.change_number, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn subscription_is_scoped_to_base() {
        let feed = MemoryChangelog::new();
        let sub = feed.subscribe(None, dn("ou=people, o=example"));

        record_add(&feed, "cn=in, ou=people, o=example");
        record_add(&feed, "cn=out, ou=groups, o=example");

        match sub.next_event(Duration::from_millis(50)).unwrap() {
            FeedEvent::Entry(entry) => {
                assert_eq!(entry.target_dn, dn("cn=in, ou=people, o=example"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            sub.next_event(Duration::from_millis(20)).unwrap(),
            FeedEvent::Idle
        ));
    }

    #[test]
    fn disconnect_surfaces_connection_error() {
        let feed = MemoryChangelog::new();
        let sub = feed.subscribe(None, dn("o=example"));
        assert_eq!(feed.subscriber_count(), 1);

        feed.disconnect_subscribers();
        assert_eq!(feed.subscriber_count(), 0);

        let err = sub.next_event(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, DirectoryError::Connection(_)));
    }

    #[test]
    fn dropped_subscriber_is_pruned_on_next_record() {
        let feed = MemoryChangelog::new();
        let sub = feed.subscribe(None, dn("o=example"));
        drop(sub);

        record_add(&feed, "cn=a, o=example");
        assert_eq!(feed.subscriber_count(), 0);
    }
}
