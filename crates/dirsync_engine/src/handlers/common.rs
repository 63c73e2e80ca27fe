//! Handler steps shared by every operation chain.

use crate::chain::{Flow, Handler, ReplicationContext, ReplicatorEnv};
use crate::error::{ReplError, ReplResult};
use dirsync_model::{Filter, SearchScope};
use tracing::debug;

/// The catch-all existence filter: matches any well-formed entry.
pub(crate) fn catch_all() -> Filter {
    Filter::present("objectclass")
}

/// Bails entries at or below the recorded checkpoint.
///
/// Replayed entries are already applied; skipping them without touching the
/// checkpoint is what makes restart idempotent.
pub struct CheckpointGuard;

impl Handler for CheckpointGuard {
    fn name(&self) -> &'static str {
        "checkpoint-guard"
    }

    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow> {
        if let Some(checkpoint) = env.checkpoint.read()? {
            if ctx.entry.change_number <= checkpoint {
                debug!(
                    change_number = ctx.entry.change_number,
                    checkpoint, "entry already applied, skipping"
                );
                return Ok(Flow::Bail);
            }
        }
        Ok(Flow::Continue)
    }
}

/// Rewrites the remote target DN under the local replication suffix.
pub struct TranslateDn;

impl Handler for TranslateDn {
    fn name(&self) -> &'static str {
        "translate-dn"
    }

    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow> {
        let local_dn = ctx.entry.target_dn.append(&env.repl_suffix);
        debug!(target = %ctx.entry.target_dn, local = %local_dn, "translated DN");
        ctx.local_dn = Some(local_dn);
        Ok(Flow::Continue)
    }
}

/// Probes the local store for the translated DN.
///
/// Absence is a normal outcome for the add and modify chains; the probe
/// records the fetched entry (or `None`) and always continues. An existing
/// DN that yields zero entries under the catch-all filter is an invariant
/// violation.
pub struct LocalProbe;

impl Handler for LocalProbe {
    fn name(&self) -> &'static str {
        "local-probe"
    }

    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow> {
        let local_dn = ctx.local_dn()?.clone();
        let mut conn = env.local_pool.acquire()?;

        match conn.search(&local_dn, SearchScope::Base, &catch_all()) {
            Ok(entries) if entries.is_empty() => Err(ReplError::InvariantViolation {
                dn: local_dn.to_string(),
            }),
            Ok(mut entries) => {
                debug!(dn = %local_dn, "local entry found");
                ctx.local_entry = Some(entries.remove(0));
                Ok(Flow::Continue)
            }
            Err(err) if err.is_no_such_object() => {
                debug!(dn = %local_dn, "no local entry");
                ctx.local_entry = None;
                Ok(Flow::Continue)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Persists the entry's change number as the new checkpoint.
pub struct WriteCheckpoint;

impl Handler for WriteCheckpoint {
    fn name(&self) -> &'static str {
        "write-checkpoint"
    }

    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow> {
        env.checkpoint.write(ctx.entry.change_number)?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
    use crate::config::PoolConfig;
    use crate::directory::MockDirectory;
    use crate::pool::ConnectionPool;
    use dirsync_model::{Attributes, ChangelogEntry, DirectoryEntry, DirectoryError, Dn};
    use std::sync::Arc;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn env_with(local: MockDirectory, checkpoint: Arc<MemoryCheckpointStore>) -> ReplicatorEnv {
        ReplicatorEnv {
            local_pool: ConnectionPool::new(Box::new(local), PoolConfig::new(2)),
            remote_pool: ConnectionPool::new(Box::new(MockDirectory::new()), PoolConfig::new(2)),
            checkpoint,
            filter: Filter::present("uid"),
            repl_suffix: dn("cn=repl, o=local"),
        }
    }

    fn delete_ctx(change_number: u64) -> ReplicationContext {
        ReplicationContext::new(ChangelogEntry::delete(
            change_number,
            dn("cn=foo, o=remote"),
            0,
        ))
    }

    #[test]
    fn guard_bails_at_or_below_checkpoint() {
        let checkpoint = Arc::new(MemoryCheckpointStore::starting_at(105));
        let env = env_with(MockDirectory::new(), Arc::clone(&checkpoint));

        let mut ctx = delete_ctx(103);
        assert_eq!(CheckpointGuard.handle(&mut ctx, &env).unwrap(), Flow::Bail);

        let mut ctx = delete_ctx(105);
        assert_eq!(CheckpointGuard.handle(&mut ctx, &env).unwrap(), Flow::Bail);

        let mut ctx = delete_ctx(106);
        assert_eq!(
            CheckpointGuard.handle(&mut ctx, &env).unwrap(),
            Flow::Continue
        );
        // The guard itself never writes.
        assert_eq!(checkpoint.write_count(), 0);
    }

    #[test]
    fn guard_passes_on_first_run() {
        let env = env_with(MockDirectory::new(), Arc::new(MemoryCheckpointStore::new()));
        let mut ctx = delete_ctx(1);
        assert_eq!(
            CheckpointGuard.handle(&mut ctx, &env).unwrap(),
            Flow::Continue
        );
    }

    #[test]
    fn translate_appends_repl_suffix() {
        let env = env_with(MockDirectory::new(), Arc::new(MemoryCheckpointStore::new()));
        let mut ctx = delete_ctx(1);
        TranslateDn.handle(&mut ctx, &env).unwrap();
        assert_eq!(
            ctx.local_dn.unwrap(),
            dn("cn=foo, o=remote, cn=repl, o=local")
        );
    }

    #[test]
    fn probe_records_found_entry() {
        let local = MockDirectory::new();
        let found = DirectoryEntry::new(
            dn("cn=foo, o=remote, cn=repl, o=local"),
            [("uid", "foo")].into_iter().collect::<Attributes>(),
        );
        local.push_search_result(Ok(vec![found.clone()]));

        let env = env_with(local, Arc::new(MemoryCheckpointStore::new()));
        let mut ctx = delete_ctx(1);
        TranslateDn.handle(&mut ctx, &env).unwrap();
        assert_eq!(LocalProbe.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert_eq!(ctx.local_entry, Some(found));
    }

    #[test]
    fn probe_tolerates_absence() {
        let local = MockDirectory::new();
        local.push_search_result(Err(DirectoryError::no_such_object(
            "cn=foo, o=remote, cn=repl, o=local",
        )));

        let env = env_with(local, Arc::new(MemoryCheckpointStore::new()));
        let mut ctx = delete_ctx(1);
        TranslateDn.handle(&mut ctx, &env).unwrap();
        assert_eq!(LocalProbe.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert!(ctx.local_entry.is_none());
    }

    #[test]
    fn probe_rejects_empty_result_for_existing_dn() {
        let local = MockDirectory::new();
        local.push_search_result(Ok(vec![]));

        let env = env_with(local, Arc::new(MemoryCheckpointStore::new()));
        let mut ctx = delete_ctx(1);
        TranslateDn.handle(&mut ctx, &env).unwrap();
        let err = LocalProbe.handle(&mut ctx, &env).unwrap_err();
        assert!(matches!(err, ReplError::InvariantViolation { .. }));
        // The session still went back to the pool.
        assert_eq!(env.local_pool.in_use(), 0);
    }

    #[test]
    fn write_checkpoint_persists() {
        let checkpoint = Arc::new(MemoryCheckpointStore::new());
        let env = env_with(MockDirectory::new(), Arc::clone(&checkpoint));
        let mut ctx = delete_ctx(42);
        WriteCheckpoint.handle(&mut ctx, &env).unwrap();
        assert_eq!(checkpoint.read().unwrap(), Some(42));
    }
}
