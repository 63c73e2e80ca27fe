//! Durable checkpoint stores.

use crate::error::{ReplError, ReplResult};
use dirsync_model::Checkpoint;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Durable record of the last fully-applied change number.
///
/// `write` must not return until the new value is durable: the worker only
/// releases the next changelog entry once the previous entry's checkpoint
/// landed. Values are monotonically non-decreasing; a regressing write is
/// rejected as an invariant error.
pub trait CheckpointStore: Send + Sync {
    /// Returns the recorded change number, or `None` on a first run.
    fn read(&self) -> ReplResult<Option<u64>>;

    /// Durably records `change_number` as the new checkpoint.
    fn write(&self, change_number: u64) -> ReplResult<()>;
}

/// A checkpoint store backed by a CBOR file.
///
/// Writes go to a temporary file in the same directory, are synced, then
/// renamed over the live file, so a crash leaves either the old or the new
/// checkpoint — never a torn one.
pub struct FileCheckpointStore {
    path: PathBuf,
    cached: Mutex<Option<u64>>,
}

impl FileCheckpointStore {
    /// Opens the store at `path`, loading the existing record if present.
    pub fn open(path: impl Into<PathBuf>) -> ReplResult<Self> {
        let path = path.into();
        let cached = match load_checkpoint(&path)? {
            Some(cp) => {
                debug!(path = %path.display(), change_number = cp.change_number, "checkpoint loaded");
                Some(cp.change_number)
            }
            None => None,
        };
        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    /// Returns the file path of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> ReplResult<Option<u64>> {
        Ok(*self.cached.lock())
    }

    fn write(&self, change_number: u64) -> ReplResult<()> {
        let mut cached = self.cached.lock();
        if let Some(current) = *cached {
            if change_number < current {
                return Err(ReplError::CheckpointRegression {
                    current,
                    requested: change_number,
                });
            }
        }

        let record = Checkpoint::new(change_number, now_ms());
        let tmp_path = self.path.with_extension("tmp");

        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| ReplError::checkpoint(format!("create {}: {e}", tmp_path.display())))?;
        ciborium::into_writer(&record, &mut tmp)
            .map_err(|e| ReplError::checkpoint(format!("encode checkpoint: {e}")))?;
        tmp.sync_all()
            .map_err(|e| ReplError::checkpoint(format!("sync {}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| ReplError::checkpoint(format!("rename over {}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), change_number, "checkpoint written");
        *cached = Some(change_number);
        Ok(())
    }
}

fn load_checkpoint(path: &Path) -> ReplResult<Option<Checkpoint>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ReplError::checkpoint(format!(
                "open {}: {e}",
                path.display()
            )))
        }
    };
    let record: Checkpoint = ciborium::from_reader(file)
        .map_err(|e| ReplError::checkpoint(format!("decode {}: {e}", path.display())))?;
    Ok(Some(record))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An in-memory checkpoint store for tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    value: Mutex<Option<u64>>,
    writes: AtomicU64,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with a change number.
    pub fn starting_at(change_number: u64) -> Self {
        Self {
            value: Mutex::new(Some(change_number)),
            writes: AtomicU64::new(0),
        }
    }

    /// Returns how many writes were performed.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self) -> ReplResult<Option<u64>> {
        Ok(*self.value.lock())
    }

    fn write(&self, change_number: u64) -> ReplResult<()> {
        let mut value = self.value.lock();
        if let Some(current) = *value {
            if change_number < current {
                return Err(ReplError::CheckpointRegression {
                    current,
                    requested: change_number,
                });
            }
        }
        *value = Some(change_number);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
