//! Handler chain execution.
//!
//! Each changelog entry runs through an ordered sequence of handler steps
//! that share one mutable [`ReplicationContext`]. A step either continues
//! the chain, bails it early without error (nothing left to do), or fails —
//! and a failure aborts the whole run, decided centrally by the replicator.

use crate::checkpoint::CheckpointStore;
use crate::error::ReplResult;
use crate::handlers;
use crate::pool::ConnectionPool;
use dirsync_model::{ChangeType, ChangelogEntry, DirectoryEntry, Dn, Filter};
use std::sync::Arc;
use tracing::debug;

/// What a handler step tells the chain to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next step.
    Continue,
    /// Stop the chain early; the entry needs no further work.
    Bail,
}

/// How a chain run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every step ran to completion.
    Completed,
    /// A step bailed the chain early.
    Bailed {
        /// The step that bailed.
        step: &'static str,
    },
}

/// Per-entry working state threaded through one chain run.
///
/// Owned exclusively by the single in-flight execution; the entry queue
/// guarantees no two chains run concurrently.
pub struct ReplicationContext {
    /// The changelog entry being converged.
    pub entry: ChangelogEntry,
    /// The entry's DN rewritten under the local replication suffix.
    pub local_dn: Option<Dn>,
    /// The local entry fetched by a probe step, if one exists.
    pub local_entry: Option<DirectoryEntry>,
}

impl ReplicationContext {
    /// Creates the context for one changelog entry.
    pub fn new(entry: ChangelogEntry) -> Self {
        Self {
            entry,
            local_dn: None,
            local_entry: None,
        }
    }

    /// Returns the translated local DN.
    ///
    /// Only valid after the DN translation step has run; anything else is a
    /// chain-ordering bug.
    pub fn local_dn(&self) -> ReplResult<&Dn> {
        self.local_dn
            .as_ref()
            .ok_or_else(|| crate::error::ReplError::internal("local DN not yet translated"))
    }
}

/// Process-wide collaborators handed to every handler step.
pub struct ReplicatorEnv {
    /// Pool of sessions to the local replica.
    pub local_pool: Arc<ConnectionPool>,
    /// Pool of sessions to the remote authoritative directory.
    pub remote_pool: Arc<ConnectionPool>,
    /// The durable checkpoint store.
    pub checkpoint: Arc<dyn CheckpointStore>,
    /// The replication policy filter.
    pub filter: Filter,
    /// Local suffix the remote tree is replicated under.
    pub repl_suffix: Dn,
}

/// One step of a handler chain.
pub trait Handler: Send + Sync {
    /// The step's name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Processes the entry, mutating the shared context.
    fn handle(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<Flow>;
}

/// An ordered sequence of handler steps for one operation type.
pub struct HandlerChain {
    name: &'static str,
    steps: Vec<Box<dyn Handler>>,
}

impl HandlerChain {
    /// Creates a chain from its ordered steps.
    pub fn new(name: &'static str, steps: Vec<Box<dyn Handler>>) -> Self {
        Self { name, steps }
    }

    /// Returns the chain's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs every step in order over the context.
    pub fn run(&self, ctx: &mut ReplicationContext, env: &ReplicatorEnv) -> ReplResult<ChainOutcome> {
        for step in &self.steps {
            debug!(
                chain = self.name,
                step = step.name(),
                change_number = ctx.entry.change_number,
                target = %ctx.entry.target_dn,
                "running handler"
            );
            match step.handle(ctx, env)? {
                Flow::Continue => {}
                Flow::Bail => {
                    debug!(
                        chain = self.name,
                        step = step.name(),
                        change_number = ctx.entry.change_number,
                        "chain bailed"
                    );
                    return Ok(ChainOutcome::Bailed { step: step.name() });
                }
            }
        }
        Ok(ChainOutcome::Completed)
    }
}

/// The three operation chains, selected per changelog entry.
///
/// All share the checkpoint-guard/DN-translation prefix and the
/// checkpoint-write suffix; only the domain-specific middle differs.
pub struct ChainSet {
    add: HandlerChain,
    modify: HandlerChain,
    delete: HandlerChain,
}

impl ChainSet {
    /// Builds the standard add/modify/delete chains.
    pub fn standard() -> Self {
        Self {
            add: HandlerChain::new(
                "add",
                vec![
                    Box::new(handlers::CheckpointGuard),
                    Box::new(handlers::TranslateDn),
                    Box::new(handlers::LocalProbe),
                    Box::new(handlers::ApplyAdd),
                    Box::new(handlers::WriteCheckpoint),
                ],
            ),
            modify: HandlerChain::new(
                "modify",
                vec![
                    Box::new(handlers::CheckpointGuard),
                    Box::new(handlers::TranslateDn),
                    Box::new(handlers::LocalProbe),
                    Box::new(handlers::ApplyModify),
                    Box::new(handlers::WriteCheckpoint),
                ],
            ),
            delete: HandlerChain::new(
                "delete",
                vec![
                    Box::new(handlers::CheckpointGuard),
                    Box::new(handlers::TranslateDn),
                    Box::new(handlers::LocalSearch),
                    Box::new(handlers::DetermineDelete),
                    Box::new(handlers::WriteCheckpoint),
                ],
            ),
        }
    }

    /// Returns the chain matching an operation type.
    pub fn chain_for(&self, change_type: ChangeType) -> &HandlerChain {
        match change_type {
            ChangeType::Add => &self.add,
            ChangeType::Modify => &self.modify,
            ChangeType::Delete => &self.delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::PoolConfig;
    use crate::directory::MockDirectory;
    use crate::error::ReplError;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn env() -> ReplicatorEnv {
        let local = MockDirectory::new();
        let remote = MockDirectory::new();
        ReplicatorEnv {
            local_pool: ConnectionPool::new(Box::new(local), PoolConfig::new(2)),
            remote_pool: ConnectionPool::new(Box::new(remote), PoolConfig::new(2)),
            checkpoint: Arc::new(MemoryCheckpointStore::new()),
            filter: Filter::present("uid"),
            repl_suffix: dn("cn=repl, o=local"),
        }
    }

    struct Step {
        name: &'static str,
        flow: fn() -> ReplResult<Flow>,
    }

    impl Handler for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handle(&self, _ctx: &mut ReplicationContext, _env: &ReplicatorEnv) -> ReplResult<Flow> {
            (self.flow)()
        }
    }

    fn ctx() -> ReplicationContext {
        ReplicationContext::new(ChangelogEntry::delete(1, dn("cn=a, o=remote"), 0))
    }

    #[test]
    fn chain_runs_all_steps() {
        let chain = HandlerChain::new(
            "test",
            vec![
                Box::new(Step {
                    name: "one",
                    flow: || Ok(Flow::Continue),
                }),
                Box::new(Step {
                    name: "two",
                    flow: || Ok(Flow::Continue),
                }),
            ],
        );
        let outcome = chain.run(&mut ctx(), &env()).unwrap();
        assert_eq!(outcome, ChainOutcome::Completed);
    }

    #[test]
    fn bail_short_circuits() {
        let chain = HandlerChain::new(
            "test",
            vec![
                Box::new(Step {
                    name: "bails",
                    flow: || Ok(Flow::Bail),
                }),
                Box::new(Step {
                    name: "unreached",
                    flow: || panic!("must not run"),
                }),
            ],
        );
        let outcome = chain.run(&mut ctx(), &env()).unwrap();
        assert_eq!(outcome, ChainOutcome::Bailed { step: "bails" });
    }

    #[test]
    fn error_aborts_the_chain() {
        let chain = HandlerChain::new(
            "test",
            vec![
                Box::new(Step {
                    name: "fails",
                    flow: || Err(ReplError::internal("boom")),
                }),
                Box::new(Step {
                    name: "unreached",
                    flow: || panic!("must not run"),
                }),
            ],
        );
        assert!(chain.run(&mut ctx(), &env()).is_err());
    }

    #[test]
    fn chain_set_selects_by_operation() {
        let chains = ChainSet::standard();
        assert_eq!(chains.chain_for(ChangeType::Add).name(), "add");
        assert_eq!(chains.chain_for(ChangeType::Modify).name(), "modify");
        assert_eq!(chains.chain_for(ChangeType::Delete).name(), "delete");
    }

    #[test]
    fn context_requires_translation() {
        let ctx = ctx();
        assert!(ctx.local_dn().is_err());
    }
}
