//! The modify chain's domain step.

use crate::chain::{Flow, Handler, ReplicationContext, ReplicatorEnv};
use crate::error::{ReplError, ReplResult};
use crate::handlers::common::catch_all;
use dirsync_model::{ChangePayload, SearchScope};
use tracing::{debug, info};

/// Applies an attribute delta, converging the local replica with the
/// filtered view of the remote entry.
///
/// Four cases fall out of the local probe and the post-image filter check:
/// - present locally, post-image in scope: apply the delta in place
/// - present locally, post-image out of scope: delete locally — the entry
///   fell out of the replicated subset
/// - absent locally, remote post-image in scope: fetch the remote entry and
///   add it — the entry just came into scope
/// - absent locally, remote out of scope or gone: nothing to do
pub struct ApplyModify;

impl Handler for ApplyModify {
    fn name(&self) -> &'static str {
        "apply-modify"
    }

    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow> {
        let local_dn = ctx.local_dn()?.clone();
        let mods = match &ctx.entry.payload {
            ChangePayload::Modify(mods) => mods,
            _ => return Err(ReplError::internal("modify chain fed a non-modify payload")),
        };

        match &ctx.local_entry {
            Some(local) => {
                let mut post_image = local.attrs.clone();
                for delta in mods {
                    post_image.apply(delta);
                }

                if env.filter.matches(&post_image) {
                    let mut conn = env.local_pool.acquire()?;
                    conn.modify(&local.dn, mods)?;
                    info!(
                        dn = %local.dn,
                        change_number = ctx.entry.change_number,
                        "modified local entry"
                    );
                } else {
                    debug!(dn = %local.dn, "entry fell out of replication filter, removing");
                    let mut conn = env.local_pool.acquire()?;
                    conn.delete(&local.dn)?;
                    info!(
                        dn = %local.dn,
                        change_number = ctx.entry.change_number,
                        "deleted local entry no longer in scope"
                    );
                }
            }
            None => {
                // Not replicated yet; the delta alone cannot rebuild the
                // entry, so fetch the remote post-image.
                let mut remote = env.remote_pool.acquire()?;
                match remote.search(&ctx.entry.target_dn, SearchScope::Base, &catch_all()) {
                    Ok(entries) => {
                        drop(remote);
                        match entries.into_iter().next() {
                            Some(entry) if env.filter.matches(&entry.attrs) => {
                                let mut conn = env.local_pool.acquire()?;
                                conn.add(&local_dn, &entry.attrs)?;
                                info!(
                                    dn = %local_dn,
                                    change_number = ctx.entry.change_number,
                                    "entry came into scope, added locally"
                                );
                            }
                            _ => {
                                debug!(
                                    dn = %local_dn,
                                    "remote entry still outside replication filter"
                                );
                            }
                        }
                    }
                    Err(err) if err.is_no_such_object() => {
                        // Deleted remotely since this record; the delete
                        // record further down the stream will be a no-op too.
                        debug!(target = %ctx.entry.target_dn, "remote entry gone");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
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
    use dirsync_model::{
        AttributeMod, Attributes, ChangelogEntry, DirectoryEntry, DirectoryError, Dn, Filter,
    };
    use std::sync::Arc;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn env_with(local: MockDirectory, remote: MockDirectory) -> ReplicatorEnv {
        ReplicatorEnv {
            local_pool: ConnectionPool::new(Box::new(local), PoolConfig::new(2)),
            remote_pool: ConnectionPool::new(Box::new(remote), PoolConfig::new(2)),
            checkpoint: Arc::new(MemoryCheckpointStore::new()),
            filter: Filter::present("uid"),
            repl_suffix: dn("cn=repl, o=local"),
        }
    }

    fn modify_ctx(mods: Vec<AttributeMod>) -> ReplicationContext {
        let mut ctx = ReplicationContext::new(ChangelogEntry::modify(
            20,
            dn("cn=m, o=remote"),
            mods,
            0,
        ));
        ctx.local_dn = Some(dn("cn=m, o=remote, cn=repl, o=local"));
        ctx
    }

    fn local_entry(attrs: Attributes) -> DirectoryEntry {
        DirectoryEntry::new(dn("cn=m, o=remote, cn=repl, o=local"), attrs)
    }

    #[test]
    fn in_scope_delta_is_applied() {
        let local = MockDirectory::new();
        let env = env_with(local.clone(), MockDirectory::new());

        let mut ctx = modify_ctx(vec![AttributeMod::replace("l", vec!["earth".into()])]);
        ctx.local_entry = Some(local_entry([("uid", "m")].into_iter().collect()));

        assert_eq!(ApplyModify.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert_eq!(
            local.calls(),
            vec![MockCall::Modify(dn("cn=m, o=remote, cn=repl, o=local"))]
        );
    }

    #[test]
    fn delta_that_leaves_scope_deletes_locally() {
        let local = MockDirectory::new();
        let env = env_with(local.clone(), MockDirectory::new());

        // Removing uid makes the post-image fail (uid=*).
        let mut ctx = modify_ctx(vec![AttributeMod::delete("uid", vec![])]);
        ctx.local_entry = Some(local_entry([("uid", "m")].into_iter().collect()));

        assert_eq!(ApplyModify.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert_eq!(
            local.calls(),
            vec![MockCall::Delete(dn("cn=m, o=remote, cn=repl, o=local"))]
        );
    }

    #[test]
    fn absent_entry_in_scope_remotely_is_added() {
        let local = MockDirectory::new();
        let remote = MockDirectory::new();
        remote.push_search_result(Ok(vec![DirectoryEntry::new(
            dn("cn=m, o=remote"),
            [("uid", "m"), ("cn", "m")].into_iter().collect::<Attributes>(),
        )]));
        let env = env_with(local.clone(), remote.clone());

        let mut ctx = modify_ctx(vec![AttributeMod::add("uid", vec!["m".into()])]);
        assert_eq!(ApplyModify.handle(&mut ctx, &env).unwrap(), Flow::Continue);

        assert_eq!(
            remote.calls(),
            vec![MockCall::Search(dn("cn=m, o=remote"))]
        );
        assert_eq!(
            local.calls(),
            vec![MockCall::Add(dn("cn=m, o=remote, cn=repl, o=local"))]
        );
        assert_eq!(env.remote_pool.in_use(), 0);
        assert_eq!(env.local_pool.in_use(), 0);
    }

    #[test]
    fn absent_entry_out_of_scope_remotely_is_skipped() {
        let local = MockDirectory::new();
        let remote = MockDirectory::new();
        remote.push_search_result(Ok(vec![DirectoryEntry::new(
            dn("cn=m, o=remote"),
            [("cn", "m")].into_iter().collect::<Attributes>(),
        )]));
        let env = env_with(local.clone(), remote);

        let mut ctx = modify_ctx(vec![AttributeMod::replace("l", vec!["x".into()])]);
        assert_eq!(ApplyModify.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert!(local.calls().is_empty());
    }

    #[test]
    fn absent_entry_gone_remotely_is_skipped() {
        let local = MockDirectory::new();
        let remote = MockDirectory::new();
        remote.push_search_result(Err(DirectoryError::no_such_object("cn=m, o=remote")));
        let env = env_with(local.clone(), remote);

        let mut ctx = modify_ctx(vec![AttributeMod::replace("l", vec!["x".into()])]);
        assert_eq!(ApplyModify.handle(&mut ctx, &env).unwrap(), Flow::Continue);
        assert!(local.calls().is_empty());
    }

    #[test]
    fn remote_fetch_failure_is_fatal() {
        let remote = MockDirectory::new();
        remote.push_search_result(Err(DirectoryError::Unavailable("down".into())));
        let env = env_with(MockDirectory::new(), remote);

        let mut ctx = modify_ctx(vec![AttributeMod::replace("l", vec!["x".into()])]);
        let err = ApplyModify.handle(&mut ctx, &env).unwrap_err();
        assert!(matches!(err, ReplError::Directory(_)));
        assert_eq!(env.remote_pool.in_use(), 0);
    }
}
