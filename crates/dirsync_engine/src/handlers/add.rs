//! The add chain's domain step.

use crate::chain::{Flow, Handler, ReplicationContext, ReplicatorEnv};
use crate::error::{ReplError, ReplResult};
use dirsync_model::ChangePayload;
use tracing::{debug, info};

/// Creates the local entry from the remote payload.
///
/// A DN that already exists locally means the record is a replay; the step
/// is a no-op so reprocessing stays idempotent. A payload outside the
/// replication filter is skipped — only in-scope entries are brought over.
pub struct ApplyAdd;

impl Handler for ApplyAdd {
    fn name(&self) -> &'static str {
        "apply-add"
    }

    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow> {
        let local_dn = ctx.local_dn()?.clone();

        if let Some(existing) = &ctx.local_entry {
            debug!(dn = %existing.dn, "entry already present locally, nothing to add");
            return Ok(Flow::Continue);
        }

        let attrs = match &ctx.entry.payload {
            ChangePayload::Add(attrs) => attrs,
            _ => return Err(ReplError::internal("add chain fed a non-add payload")),
        };

        if env.filter.matches(attrs) {
            let mut conn = env.local_pool.acquire()?;
            conn.add(&local_dn, attrs)?;
            info!(
                dn = %local_dn,
                change_number = ctx.entry.change_number,
                "added local entry"
            );
        } else {
            debug!(
                dn = %local_dn,
                filter = %env.filter,
                "payload outside replication filter, skipping add"
            );
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ReplicatorEnv;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::PoolConfig;
    use crate::directory::{MockCall, MockDirectory};
    use crate::pool::ConnectionPool;
    use dirsync_model::{Attributes, ChangelogEntry, DirectoryEntry, Dn, Filter};
    use std::sync::Arc;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn env_with(local: MockDirectory) -> ReplicatorEnv {
        ReplicatorEnv {
            local_pool: ConnectionPool::new(Box::new(local), PoolConfig::new(2)),
            remote_pool: ConnectionPool::new(Box::new(MockDirectory::new()), PoolConfig::new(2)),
            checkpoint: Arc::new(MemoryCheckpointStore::new()),
            filter: Filter::present("uid"),
            repl_suffix: dn("cn=repl, o=local"),
        }
    }

    fn add_ctx(attrs: Attributes) -> ReplicationContext {
        let mut ctx = ReplicationContext::new(ChangelogEntry::add(
            10,
            dn("cn=new, o=remote"),
            attrs,
            0,
        ));
        ctx.local_dn = Some(dn("cn=new, o=remote, cn=repl, o=local"));
        ctx
    }

    #[test]
    fn in_scope_payload_is_added() {
        let local = MockDirectory::new();
        let env = env_with(local.clone());

        let mut ctx = add_ctx([("uid", "new"), ("cn", "new")].into_iter().collect());
        assert_eq!(ApplyAdd.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert_eq!(
            local.calls(),
            vec![MockCall::Add(dn("cn=new, o=remote, cn=repl, o=local"))]
        );
        assert_eq!(env.local_pool.in_use(), 0);
    }

    #[test]
    fn out_of_scope_payload_is_skipped() {
        let local = MockDirectory::new();
        let env = env_with(local.clone());

        let mut ctx = add_ctx([("cn", "new")].into_iter().collect());
        assert_eq!(ApplyAdd.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert!(local.calls().is_empty());
    }

    #[test]
    fn existing_entry_is_a_replay_no_op() {
        let local = MockDirectory::new();
        let env = env_with(local.clone());

        let mut ctx = add_ctx([("uid", "new")].into_iter().collect());
        ctx.local_entry = Some(DirectoryEntry::new(
            dn("cn=new, o=remote, cn=repl, o=local"),
            [("uid", "new")].into_iter().collect::<Attributes>(),
        ));

        assert_eq!(ApplyAdd.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert!(local.calls().is_empty());
    }

    #[test]
    fn wrong_payload_is_internal_error() {
        let env = env_with(MockDirectory::new());
        let mut ctx =
            ReplicationContext::new(ChangelogEntry::delete(10, dn("cn=new, o=remote"), 0));
        ctx.local_dn = Some(dn("cn=new, o=remote, cn=repl, o=local"));

        let err = ApplyAdd.handle(&mut ctx, &env).unwrap_err();
        assert!(matches!(err, ReplError::Internal(_)));
    }
}
