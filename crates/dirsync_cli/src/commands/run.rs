//! Run command implementation.
//!
//! Wires a replication run from a JSON configuration. `mem:` URLs drive a
//! self-contained in-memory directory pair, seeded from the configuration's
//! `seed` list; no wire-protocol client is built into this binary, so other
//! schemes are rejected up front.

use super::CliError;
use dirsync_directory::{ChangelogSubscription, FeedEvent, MemoryChangelog, MemoryDirectory};
use dirsync_engine::{
    ChangelogSource, ChangelogStream, CheckpointStore, Directory, DirectoryConnector,
    DirectoryUrl, FileCheckpointStore, PoolConfig, ReplConfig, Replicator, StreamEvent,
};
use dirsync_model::{
    AttributeMod, Attributes, DirectoryEntry, DirectoryError, Dn, Filter, SearchScope,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A JSON run configuration.
#[derive(Debug, Deserialize)]
struct RunFile {
    /// Remote directory URL, with the replication filter embedded.
    remote_url: String,
    /// Local replica directory URL.
    local_url: String,
    /// Path of the durable checkpoint file.
    checkpoint_path: PathBuf,
    /// Local suffix the remote tree is replicated under.
    repl_suffix: String,
    #[serde(default)]
    queue_capacity: Option<usize>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    max_connections: Option<usize>,
    /// Entries loaded into the remote directory before the run.
    #[serde(default)]
    seed: Vec<SeedEntry>,
}

#[derive(Debug, Deserialize)]
struct SeedEntry {
    dn: String,
    #[serde(default)]
    attrs: BTreeMap<String, Vec<String>>,
}

/// The final report of a run.
#[derive(Debug, Serialize)]
struct RunReport {
    entries_applied: u64,
    entries_skipped: u64,
    resubscriptions: u64,
    checkpoint: Option<u64>,
    local_entries: usize,
}

/// Runs a replication described by the configuration file.
pub fn run(config_path: &Path, format: &str) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(config_path)?;
    let file: RunFile = serde_json::from_str(&raw)?;

    let remote_url = DirectoryUrl::parse(&file.remote_url)?;
    let local_url = DirectoryUrl::parse(&file.local_url)?;
    let repl_suffix = Dn::parse(&file.repl_suffix)
        .map_err(|e| CliError::Config(format!("repl_suffix: {e}")))?;

    for url in [&remote_url, &local_url] {
        if url.scheme() != "mem" {
            return Err(CliError::Config(format!(
                "no directory client for {:?} URLs; only mem: topologies are built in",
                url.scheme()
            )));
        }
    }
    let remote_base = remote_url
        .base_dn()
        .cloned()
        .ok_or_else(|| CliError::Config("remote URL carries no base DN".into()))?;
    let local_base = local_url
        .base_dn()
        .cloned()
        .ok_or_else(|| CliError::Config("local URL carries no base DN".into()))?;

    let mut config = ReplConfig::new(
        remote_url,
        local_url,
        &file.checkpoint_path,
        repl_suffix.clone(),
    );
    if let Some(capacity) = file.queue_capacity {
        config = config.with_queue_capacity(capacity);
    }
    if let Some(ms) = file.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    if let Some(max) = file.max_connections {
        config = config.with_pool(PoolConfig::new(max));
    }

    let local = Arc::new(MemoryDirectory::new(local_base.clone()));
    local.add(local_base.clone(), attr_set(&[("objectclass", "organization")]))?;
    if repl_suffix != local_base {
        local.add(repl_suffix, attr_set(&[("objectclass", "container")]))?;
    }

    let remote = Arc::new(MemoryDirectory::with_changelog(remote_base.clone()));
    let feed = Arc::clone(
        remote
            .changelog()
            .ok_or_else(|| CliError::Config("remote directory records no changelog".into()))?,
    );

    for entry in &file.seed {
        let dn = Dn::parse(&entry.dn)
            .map_err(|e| CliError::Config(format!("seed entry {:?}: {e}", entry.dn)))?;
        let mut attrs = Attributes::new();
        for (name, values) in &entry.attrs {
            for value in values {
                attrs.insert(name, value.clone());
            }
        }
        remote.add(dn, attrs)?;
    }
    let target = feed.latest_change_number();

    let checkpoint = Arc::new(FileCheckpointStore::open(&file.checkpoint_path)?);
    let poll = config.poll_interval;
    let replicator = Replicator::start(
        config,
        Box::new(MemConnector {
            dir: Arc::clone(&local),
            label: "local",
        }),
        Box::new(MemConnector {
            dir: Arc::clone(&remote),
            label: "remote",
        }),
        Box::new(MemSource {
            feed,
            base: remote_base,
        }),
        Arc::clone(&checkpoint) as Arc<dyn CheckpointStore>,
    )?;
    info!(seeded = file.seed.len(), target, "replication started");

    // Drain the seeded backlog, then stop.
    while !replicator.has_failed() && checkpoint.read()?.unwrap_or(0) < target {
        std::thread::sleep(poll);
    }
    replicator.shutdown();
    let stats = replicator.join()?;

    let report = RunReport {
        entries_applied: stats.entries_applied,
        entries_skipped: stats.entries_skipped,
        resubscriptions: stats.resubscriptions,
        checkpoint: checkpoint.read()?,
        local_entries: local.len(),
    };
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_report(&report),
    }

    Ok(())
}

fn print_text_report(report: &RunReport) {
    println!("Replication run complete");
    println!("  entries applied: {}", report.entries_applied);
    println!("  entries skipped: {}", report.entries_skipped);
    println!("  resubscriptions: {}", report.resubscriptions);
    match report.checkpoint {
        Some(n) => println!("  checkpoint:      {n}"),
        None => println!("  checkpoint:      none"),
    }
    println!("  local entries:   {}", report.local_entries);
}

fn attr_set(pairs: &[(&str, &str)]) -> Attributes {
    pairs.iter().map(|&(a, v)| (a, v)).collect()
}

/// A pooled session over the in-memory directory.
struct MemSession {
    dir: Arc<MemoryDirectory>,
}

impl Directory for MemSession {
    fn search(
        &mut self,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.dir.search(base, scope, filter)
    }

    fn add(&mut self, dn: &Dn, attrs: &Attributes) -> Result<(), DirectoryError> {
        self.dir.add(dn.clone(), attrs.clone())
    }

    fn modify(&mut self, dn: &Dn, mods: &[AttributeMod]) -> Result<(), DirectoryError> {
        self.dir.modify(dn, mods)
    }

    fn delete(&mut self, dn: &Dn) -> Result<(), DirectoryError> {
        self.dir.delete(dn)
    }
}

/// A connector handing out sessions to one in-memory directory.
struct MemConnector {
    dir: Arc<MemoryDirectory>,
    label: &'static str,
}

impl DirectoryConnector for MemConnector {
    fn connect(&self) -> Result<Box<dyn Directory>, DirectoryError> {
        Ok(Box::new(MemSession {
            dir: Arc::clone(&self.dir),
        }))
    }

    fn target(&self) -> &str {
        self.label
    }
}

/// A changelog source over the in-memory feed.
struct MemSource {
    feed: Arc<MemoryChangelog>,
    base: Dn,
}

impl ChangelogSource for MemSource {
    fn subscribe(
        &self,
        resume_after: Option<u64>,
    ) -> Result<Box<dyn ChangelogStream>, DirectoryError> {
        Ok(Box::new(MemStream {
            sub: self.feed.subscribe(resume_after, self.base.clone()),
        }))
    }
}

struct MemStream {
    sub: ChangelogSubscription,
}

impl ChangelogStream for MemStream {
    fn next_event(&mut self, timeout: Duration) -> Result<StreamEvent, DirectoryError> {
        Ok(match self.sub.next_event(timeout)? {
            FeedEvent::Entry(entry) => StreamEvent::Entry(entry),
            FeedEvent::Idle => StreamEvent::Idle,
            FeedEvent::Closed => StreamEvent::Closed,
        })
    }
}
