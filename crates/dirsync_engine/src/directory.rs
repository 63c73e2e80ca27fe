//! Directory and changelog-source abstractions.
//!
//! These traits are the engine's boundary to the wire protocol. The engine
//! orchestrates searches and mutations; how they reach a server (or an
//! in-memory store under test) is the implementor's concern.

use dirsync_model::{
    AttributeMod, Attributes, ChangelogEntry, DirectoryEntry, DirectoryError, Dn, Filter,
    SearchScope,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A live, authenticated directory session.
///
/// One session is borrowed from a pool by exactly one handler at a time, so
/// operations take `&mut self`.
pub trait Directory: Send {
    /// Searches under `base` with the given scope and filter.
    ///
    /// A missing base DN is reported as `NoSuchObject`; a successful search
    /// with zero results means the base exists but nothing matched.
    fn search(
        &mut self,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Adds an entry.
    fn add(&mut self, dn: &Dn, attrs: &Attributes) -> Result<(), DirectoryError>;

    /// Applies an attribute delta to an entry.
    fn modify(&mut self, dn: &Dn, mods: &[AttributeMod]) -> Result<(), DirectoryError>;

    /// Deletes an entry.
    fn delete(&mut self, dn: &Dn) -> Result<(), DirectoryError>;
}

/// Establishes directory sessions for a connection pool.
pub trait DirectoryConnector: Send + Sync {
    /// Opens a new authenticated session.
    fn connect(&self) -> Result<Box<dyn Directory>, DirectoryError>;

    /// A short label for diagnostics, e.g. `"local"` or the server host.
    fn target(&self) -> &str;
}

/// One delivery from a changelog stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// The next changelog entry, in change-number order.
    Entry(ChangelogEntry),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The stream ended; no further entries will arrive.
    Closed,
}

/// A live, ordered subscription to the remote changelog.
pub trait ChangelogStream: Send {
    /// Waits up to `timeout` for the next event.
    ///
    /// Errors indicate the stream broke; the consumer re-subscribes from
    /// its durable checkpoint.
    fn next_event(&mut self, timeout: Duration) -> Result<StreamEvent, DirectoryError>;
}

/// Opens changelog subscriptions, scoped by the replication policy.
pub trait ChangelogSource: Send + Sync {
    /// Opens a subscription resuming strictly after `resume_after`, or from
    /// the beginning when `None`.
    fn subscribe(&self, resume_after: Option<u64>)
        -> Result<Box<dyn ChangelogStream>, DirectoryError>;
}

/// A directory call recorded by [`MockDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// A search against a base DN.
    Search(Dn),
    /// An add of a DN.
    Add(Dn),
    /// A modify of a DN.
    Modify(Dn),
    /// A delete of a DN.
    Delete(Dn),
}

#[derive(Default)]
struct MockState {
    search_results: VecDeque<Result<Vec<DirectoryEntry>, DirectoryError>>,
    add_error: Option<DirectoryError>,
    modify_error: Option<DirectoryError>,
    delete_error: Option<DirectoryError>,
    connect_failures: u32,
    connects: u32,
    calls: Vec<MockCall>,
}

/// A scripted directory for unit tests.
///
/// Clones share state, so a `MockDirectory` doubles as its own connector:
/// sessions handed out by [`DirectoryConnector::connect`] observe the same
/// scripted responses and record into the same call log.
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<MockState>>,
}

impl MockDirectory {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next search.
    pub fn push_search_result(&self, result: Result<Vec<DirectoryEntry>, DirectoryError>) {
        self.state.lock().search_results.push_back(result);
    }

    /// Makes the next add fail.
    pub fn fail_add(&self, error: DirectoryError) {
        self.state.lock().add_error = Some(error);
    }

    /// Makes the next modify fail.
    pub fn fail_modify(&self, error: DirectoryError) {
        self.state.lock().modify_error = Some(error);
    }

    /// Makes the next delete fail.
    pub fn fail_delete(&self, error: DirectoryError) {
        self.state.lock().delete_error = Some(error);
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Returns the recorded calls, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Returns how many sessions were opened.
    pub fn connect_count(&self) -> u32 {
        self.state.lock().connects
    }
}

impl Directory for MockDirectory {
    fn search(
        &mut self,
        base: &Dn,
        _scope: SearchScope,
        _filter: &Filter,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Search(base.clone()));
        state
            .search_results
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn add(&mut self, dn: &Dn, _attrs: &Attributes) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Add(dn.clone()));
        match state.add_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn modify(&mut self, dn: &Dn, _mods: &[AttributeMod]) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Modify(dn.clone()));
        match state.modify_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn delete(&mut self, dn: &Dn) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Delete(dn.clone()));
        match state.delete_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl DirectoryConnector for MockDirectory {
    fn connect(&self) -> Result<Box<dyn Directory>, DirectoryError> {
        let mut state = self.state.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(DirectoryError::Unavailable("scripted connect failure".into()));
        }
        state.connects += 1;
        Ok(Box::new(self.clone()))
    }

    fn target(&self) -> &str {
        "mock"
    }
}

/// A scripted changelog source for unit tests.
///
/// Every subscription replays the scripted entries strictly after the
/// requested resume position, then reports `Idle` until the feed is closed.
#[derive(Clone, Default)]
pub struct MockChangelogSource {
    state: Arc<Mutex<MockSourceState>>,
}

#[derive(Default)]
struct MockSourceState {
    entries: Vec<ChangelogEntry>,
    closed: bool,
    subscriptions: u32,
}

impl MockChangelogSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to the scripted feed.
    pub fn push(&self, entry: ChangelogEntry) {
        self.state.lock().entries.push(entry);
    }

    /// Marks the feed as closed: drained streams report `Closed`.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Returns how many subscriptions were opened.
    pub fn subscription_count(&self) -> u32 {
        self.state.lock().subscriptions
    }
}

impl ChangelogSource for MockChangelogSource {
    fn subscribe(
        &self,
        resume_after: Option<u64>,
    ) -> Result<Box<dyn ChangelogStream>, DirectoryError> {
        let mut state = self.state.lock();
        state.subscriptions += 1;
        let cursor = resume_after.unwrap_or(0);
        let pending: VecDeque<ChangelogEntry> = state
            .entries
            .iter()
            .filter(|e| e.change_number > cursor)
            .cloned()
            .collect();
        Ok(Box::new(MockStream {
            pending,
            source: self.clone(),
        }))
    }
}

struct MockStream {
    pending: VecDeque<ChangelogEntry>,
    source: MockChangelogSource,
}

impl ChangelogStream for MockStream {
    fn next_event(&mut self, _timeout: Duration) -> Result<StreamEvent, DirectoryError> {
        match self.pending.pop_front() {
            Some(entry) => Ok(StreamEvent::Entry(entry)),
            None if self.source.state.lock().closed => Ok(StreamEvent::Closed),
            None => Ok(StreamEvent::Idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn mock_records_calls() {
        let mock = MockDirectory::new();
        let mut session = mock.connect().unwrap();

        session
            .search(&dn("cn=a, o=x"), SearchScope::Base, &Filter::present("objectclass"))
            .unwrap();
        session.delete(&dn("cn=a, o=x")).unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                MockCall::Search(dn("cn=a, o=x")),
                MockCall::Delete(dn("cn=a, o=x")),
            ]
        );
        assert_eq!(mock.connect_count(), 1);
    }

    #[test]
    fn mock_scripted_search_results() {
        let mock = MockDirectory::new();
        mock.push_search_result(Err(DirectoryError::no_such_object("cn=a, o=x")));

        let mut session = mock.connect().unwrap();
        let err = session
            .search(&dn("cn=a, o=x"), SearchScope::Base, &Filter::present("objectclass"))
            .unwrap_err();
        assert!(err.is_no_such_object());

        // Unscripted searches return an empty result set.
        let hits = session
            .search(&dn("cn=a, o=x"), SearchScope::Base, &Filter::present("objectclass"))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn mock_connect_failures_are_consumed() {
        let mock = MockDirectory::new();
        mock.fail_connects(2);

        assert!(mock.connect().is_err());
        assert!(mock.connect().is_err());
        assert!(mock.connect().is_ok());
    }

    #[test]
    fn mock_source_resumes_after_cursor() {
        let source = MockChangelogSource::new();
        for n in 1..=4 {
            source.push(ChangelogEntry::delete(n, dn("cn=a, o=x"), 0));
        }

        let mut stream = source.subscribe(Some(2)).unwrap();
        match stream.next_event(Duration::from_millis(1)).unwrap() {
            StreamEvent::Entry(e) => assert_eq!(e.change_number, 3),
            other => panic!("unexpected event: {other:?}"),
        }
        match stream.next_event(Duration::from_millis(1)).unwrap() {
            StreamEvent::Entry(e) => assert_eq!(e.change_number, 4),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            stream.next_event(Duration::from_millis(1)).unwrap(),
            StreamEvent::Idle
        ));

        source.close();
        assert!(matches!(
            stream.next_event(Duration::from_millis(1)).unwrap(),
            StreamEvent::Closed
        ));
        assert_eq!(source.subscription_count(), 1);
    }
}
