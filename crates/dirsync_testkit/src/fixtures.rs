//! Test fixtures and topology helpers.
//!
//! Provides a wired local/remote directory pair and checkpoint-file helpers
//! for exercising a replication run end to end.

use dirsync_directory::{MemoryChangelog, MemoryDirectory};
use dirsync_model::{Attributes, Dn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Builds an attribute set from `(name, value)` pairs.
pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs.iter().map(|&(a, v)| (a, v)).collect()
}

/// Parses a DN, panicking on malformed test input.
pub fn dn(s: &str) -> Dn {
    Dn::parse(s).expect("test DN must parse")
}

/// A wired replication topology: a local replica, a remote authoritative
/// directory, and the remote changelog feed.
///
/// The local tree is pre-seeded with its root and the replication container;
/// every remote mutation lands on the changelog feed.
pub struct TestTopology {
    /// The local replica.
    pub local: Arc<MemoryDirectory>,
    /// The remote authoritative directory.
    pub remote: Arc<MemoryDirectory>,
    /// The feed recording the remote's mutations.
    pub feed: Arc<MemoryChangelog>,
    repl_suffix: Dn,
}

impl TestTopology {
    /// Creates a topology with the given local root, remote root and
    /// replication suffix.
    pub fn new(local_root: &str, remote_root: &str, repl_suffix: &str) -> Self {
        let local = Arc::new(MemoryDirectory::new(dn(local_root)));
        local
            .add(dn(local_root), attrs(&[("objectclass", "organization")]))
            .expect("seed local root");
        let repl_suffix = dn(repl_suffix);
        if repl_suffix != dn(local_root) {
            local
                .add(repl_suffix.clone(), attrs(&[("objectclass", "container")]))
                .expect("seed replication container");
        }

        let remote = Arc::new(MemoryDirectory::with_changelog(dn(remote_root)));
        let feed = Arc::clone(remote.changelog().expect("remote records a changelog"));

        Self {
            local,
            remote,
            feed,
            repl_suffix,
        }
    }

    /// The conventional topology: `o=local` replicating `o=remote` under
    /// `cn=repl, o=local`.
    pub fn standard() -> Self {
        Self::new("o=local", "o=remote", "cn=repl, o=local")
    }

    /// Returns the local replication suffix.
    pub fn repl_suffix(&self) -> &Dn {
        &self.repl_suffix
    }

    /// The local DN a remote DN replicates to.
    pub fn local_dn(&self, remote_dn: &str) -> Dn {
        dn(remote_dn).append(&self.repl_suffix)
    }

    /// Adds an entry to the remote directory and returns the change number
    /// its changelog record was assigned.
    pub fn seed_remote(&self, entry_dn: &str, pairs: &[(&str, &str)]) -> u64 {
        self.remote
            .add(dn(entry_dn), attrs(pairs))
            .expect("seed remote entry");
        self.feed.latest_change_number()
    }

    /// Adds an already-replicated entry directly to the local replica.
    pub fn seed_local(&self, remote_dn: &str, pairs: &[(&str, &str)]) -> Dn {
        let local_dn = self.local_dn(remote_dn);
        self.local
            .add(local_dn.clone(), attrs(pairs))
            .expect("seed local entry");
        local_dn
    }
}

/// A checkpoint file path inside its own temporary directory.
///
/// The directory, and any checkpoint written into it, is removed when the
/// fixture drops. The path itself does not exist until a store writes it, so
/// first-run behavior can be exercised too.
pub struct CheckpointFile {
    path: PathBuf,
    _dir: TempDir,
}

impl CheckpointFile {
    /// Creates a fresh checkpoint path.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp directory");
        Self {
            path: dir.path().join("checkpoint"),
            _dir: dir,
        }
    }

    /// Returns the checkpoint path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for CheckpointFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-built replication scenarios.
pub mod scenarios {
    use super::TestTopology;

    /// A standard topology whose remote holds `count` person entries, each
    /// carrying a `uid` so a `(uid=*)` policy selects them all.
    pub fn populated_remote(count: usize) -> TestTopology {
        let topo = TestTopology::standard();
        for i in 0..count {
            topo.seed_remote(
                &format!("cn=user{i}, o=remote"),
                &[("objectclass", "person"), ("uid", &format!("user{i}"))],
            );
        }
        topo
    }

    /// A standard topology whose local replica already holds one entry
    /// inside a `(uid=*)` policy and one outside it.
    pub fn mixed_local() -> TestTopology {
        let topo = TestTopology::standard();
        topo.seed_local(
            "cn=in, o=remote",
            &[("objectclass", "person"), ("uid", "in")],
        );
        topo.seed_local("cn=out, o=remote", &[("objectclass", "person")]);
        topo
    }
}
