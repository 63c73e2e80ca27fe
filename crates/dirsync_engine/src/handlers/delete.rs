//! The delete chain's domain steps.

use crate::chain::{Flow, Handler, ReplicationContext, ReplicatorEnv};
use crate::error::{ReplError, ReplResult};
use crate::handlers::common::catch_all;
use dirsync_model::SearchScope;
use tracing::{debug, info};

/// Searches the local store for the entry to delete.
///
/// When the translated DN does not exist locally there is nothing to
/// delete: the step writes the checkpoint itself and bails the rest of the
/// chain. An existing DN yielding zero entries under the catch-all filter
/// is an invariant violation — the catch-all must match any real entry.
pub struct LocalSearch;

impl Handler for LocalSearch {
    fn name(&self) -> &'static str {
        "local-search"
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
                debug!(dn = %local_dn, "does not exist locally, nothing to delete");
                drop(conn);
                env.checkpoint.write(ctx.entry.change_number)?;
                Ok(Flow::Bail)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Decides whether the found local entry is in replication scope, and
/// deletes it when it is.
///
/// An entry that does not satisfy the replication filter was never brought
/// in by this pipeline, so it is left untouched.
pub struct DetermineDelete;

impl Handler for DetermineDelete {
    fn name(&self) -> &'static str {
        "determine-delete"
    }

    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow> {
        let local = ctx
            .local_entry
            .as_ref()
            .ok_or_else(|| ReplError::internal("determine-delete ran without a local entry"))?;

        if env.filter.matches(&local.attrs) {
            debug!(dn = %local.dn, "entry matches replication filter, deleting");
            let mut conn = env.local_pool.acquire()?;
            conn.delete(&local.dn)?;
            info!(
                dn = %local.dn,
                change_number = ctx.entry.change_number,
                "deleted local entry"
            );
        } else {
            debug!(
                dn = %local.dn,
                filter = %env.filter,
                "entry does not match replication filter, leaving untouched"
            );
        }
        Ok(Flow::Continue)
    }
}
