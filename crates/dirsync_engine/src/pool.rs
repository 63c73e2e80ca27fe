//! Bounded directory connection pools.

use crate::config::PoolConfig;
use crate::directory::{Directory, DirectoryConnector};
use crate::error::{ReplError, ReplResult};
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

struct PoolState {
    idle: Vec<Box<dyn Directory>>,
    total: usize,
}

/// A bounded pool of directory sessions.
///
/// Sessions are opened lazily up to `max_connections`; once the cap is
/// reached, `acquire` waits for a release up to the configured timeout.
/// Opening a session goes through the connect retry budget before the
/// failure escalates.
pub struct ConnectionPool {
    connector: Box<dyn DirectoryConnector>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl ConnectionPool {
    /// Creates a pool over the given connector.
    pub fn new(connector: Box<dyn DirectoryConnector>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            connector,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
            }),
            released: Condvar::new(),
        })
    }

    /// Borrows a session, opening one if the pool has headroom.
    ///
    /// The returned guard gives the session back on drop, whatever path the
    /// caller exits through.
    pub fn acquire(self: &Arc<Self>) -> ReplResult<PooledConnection> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: Arc::clone(self),
                    conn: Some(conn),
                    keep: true,
                });
            }

            if state.total < self.config.max_connections {
                state.total += 1;
                drop(state);

                match self.connect_with_retry() {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            pool: Arc::clone(self),
                            conn: Some(conn),
                            keep: true,
                        })
                    }
                    Err(err) => {
                        let mut state = self.state.lock();
                        state.total -= 1;
                        self.released.notify_one();
                        return Err(err);
                    }
                }
            }

            if self.released.wait_until(&mut state, deadline).timed_out() {
                return Err(ReplError::PoolExhausted {
                    target: self.connector.target().to_string(),
                    waited_ms: self.config.acquire_timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Opens a session, retrying per the configured budget.
    fn connect_with_retry(&self) -> ReplResult<Box<dyn Directory>> {
        let retry = &self.config.connect_retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            let delay = retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match self.connector.connect() {
                Ok(conn) => {
                    debug!(target = self.connector.target(), "directory session opened");
                    return Ok(conn);
                }
                Err(err) => {
                    warn!(
                        target = self.connector.target(),
                        attempt = attempt + 1,
                        error = %err,
                        "directory connect failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(ReplError::ConnectFailed {
            target: self.connector.target().to_string(),
            attempts: retry.max_attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".into()),
        })
    }

    /// Returns the number of idle sessions.
    pub fn available(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Returns the number of sessions currently borrowed.
    pub fn in_use(&self) -> usize {
        let state = self.state.lock();
        state.total - state.idle.len()
    }

    /// Returns the number of sessions the pool has open.
    pub fn total(&self) -> usize {
        self.state.lock().total
    }
}

/// An RAII guard over a borrowed directory session.
///
/// Dropping the guard returns the session to its pool; [`discard`] drops a
/// broken session instead so the pool can open a fresh one.
///
/// [`discard`]: PooledConnection::discard
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Box<dyn Directory>>,
    keep: bool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn.as_ref().map(|_| "<connection>"))
            .field("keep", &self.keep)
            .finish()
    }
}

impl PooledConnection {
    /// Drops the session without returning it to the pool.
    pub fn discard(mut self) {
        self.keep = false;
    }
}

impl Deref for PooledConnection {
    type Target = dyn Directory;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("session present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("session present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        match (self.keep, self.conn.take()) {
            (true, Some(conn)) => state.idle.push(conn),
            _ => state.total -= 1,
        }
        self.pool.released.notify_one();
    }
}
