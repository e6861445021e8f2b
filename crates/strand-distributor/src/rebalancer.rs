//! Data movement after a ring change.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_net::PeerClient;
use strand_ring::Ring;
use strand_store::{BlockStore, INodeStore};
use strand_types::{BlockRef, INodeRef, PeerPermutation};
use tracing::{debug, warn};

use crate::distributor::inode_permutation;
use crate::error::DistributorError;

/// Local resources a rebalance may use.
pub struct RebalanceContext {
    /// This node's cluster identity.
    pub uuid: String,
    /// Locally held blocks.
    pub blocks: Arc<dyn BlockStore>,
    /// Locally held inode records.
    pub inodes: Arc<dyn INodeStore>,
    /// Client for pushing copies to peers.
    pub client: Arc<PeerClient>,
    /// Replication target for inode records.
    pub inode_replication: usize,
}

/// Counters reported by a rebalance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebalanceSummary {
    /// Local records examined.
    pub scanned: usize,
    /// Copies pushed to new owners.
    pub pushed: usize,
    /// Local copies deleted because this node no longer owns them.
    pub dropped: usize,
    /// Pushes that failed.
    pub failed: usize,
}

/// Executes the data movement implied by a ring version change.
///
/// The distributor calls this once per transition, never two at a time.
#[async_trait::async_trait]
pub trait Rebalancer: Send + Sync + 'static {
    /// Move local data from its placement under `old` to its placement
    /// under `new`.
    async fn rebalance(
        &self,
        ctx: &RebalanceContext,
        old: Arc<dyn Ring>,
        new: Arc<dyn Ring>,
    ) -> Result<RebalanceSummary, DistributorError>;
}

/// Rebalancer that moves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRebalancer;

#[async_trait::async_trait]
impl Rebalancer for NoopRebalancer {
    async fn rebalance(
        &self,
        _ctx: &RebalanceContext,
        _old: Arc<dyn Ring>,
        _new: Arc<dyn Ring>,
    ) -> Result<RebalanceSummary, DistributorError> {
        Ok(RebalanceSummary::default())
    }
}

/// Pushes local copies to the peers that own them under the new ring.
///
/// A node that stays a primary sends its copy to the peers that became
/// primaries, trusting the other old primaries to hold theirs. A node that
/// gives up its copy, or held one without being a primary (a
/// [`WriteLevel::Local`](crate::WriteLevel::Local) write), sends it to every
/// new primary and deletes it only once each push was acknowledged.
///
/// Copies with a failed push are remembered; on the next transition they
/// are sent to every new primary again.
#[derive(Debug, Default)]
pub struct ReplicationRebalancer {
    retry: Mutex<Retry>,
}

/// Local copies whose last hand-off did not complete.
#[derive(Debug, Default)]
struct Retry {
    blocks: HashSet<BlockRef>,
    inodes: HashSet<INodeRef>,
}

impl ReplicationRebalancer {
    /// Create the rebalancer.
    pub fn new() -> Self {
        Self::default()
    }
}

/// What to do with one local copy.
struct Plan {
    /// Peers that must receive a copy.
    targets: Vec<String>,
    /// Whether this node keeps its copy.
    keep: bool,
}

impl Plan {
    /// `retry` marks a copy whose previous hand-off failed.
    fn new(uuid: &str, old: &PeerPermutation, new: &PeerPermutation, retry: bool) -> Self {
        let keep = new.is_primary(uuid);
        // Other old primaries only count as holders while this node was one
        // of them, keeps its copy, and its own pushes went through.
        let trust_old = keep && old.is_primary(uuid) && !retry;
        let targets = new
            .primaries()
            .iter()
            .filter(|peer| peer.as_str() != uuid && !(trust_old && old.is_primary(peer)))
            .cloned()
            .collect();
        Self { targets, keep }
    }

    fn is_noop(&self) -> bool {
        self.targets.is_empty() && self.keep
    }
}

/// Record whether `key` still needs a hand-off.
fn settle<K: Hash + Eq>(pending: &mut HashSet<K>, key: K, done: bool) {
    if done {
        pending.remove(&key);
    } else {
        pending.insert(key);
    }
}

#[async_trait::async_trait]
impl Rebalancer for ReplicationRebalancer {
    async fn rebalance(
        &self,
        ctx: &RebalanceContext,
        old: Arc<dyn Ring>,
        new: Arc<dyn Ring>,
    ) -> Result<RebalanceSummary, DistributorError> {
        let mut summary = RebalanceSummary::default();

        for key in ctx.blocks.list().await? {
            summary.scanned += 1;
            let retry = self.retry.lock().blocks.contains(&key);
            let plan = Plan::new(
                &ctx.uuid,
                &old.get_peers(&key)?,
                &new.get_peers(&key)?,
                retry,
            );
            if plan.is_noop() {
                settle(&mut self.retry.lock().blocks, key, true);
                continue;
            }
            let Some(data) = ctx.blocks.get(key).await? else {
                settle(&mut self.retry.lock().blocks, key, true);
                continue;
            };

            let mut all_pushed = true;
            for target in &plan.targets {
                match ctx.client.put_block(target, key, data.clone()).await {
                    Ok(()) => summary.pushed += 1,
                    Err(e) => {
                        warn!(%key, %target, error = %e, "failed to push block to new owner");
                        summary.failed += 1;
                        all_pushed = false;
                    }
                }
            }
            settle(&mut self.retry.lock().blocks, key, all_pushed);

            if !plan.keep && all_pushed {
                ctx.blocks.delete(key).await?;
                summary.dropped += 1;
                debug!(%key, "dropped block no longer owned");
            }
        }

        for inode in ctx.inodes.list().await? {
            summary.scanned += 1;
            let retry = self.retry.lock().inodes.contains(&inode);
            let plan = Plan::new(
                &ctx.uuid,
                &inode_permutation(old.as_ref(), inode, ctx.inode_replication)?,
                &inode_permutation(new.as_ref(), inode, ctx.inode_replication)?,
                retry,
            );
            if plan.is_noop() {
                settle(&mut self.retry.lock().inodes, inode, true);
                continue;
            }
            let Some(record) = ctx.inodes.get(inode).await? else {
                settle(&mut self.retry.lock().inodes, inode, true);
                continue;
            };

            let mut all_pushed = true;
            for target in &plan.targets {
                match ctx.client.put_inode(target, inode, record.clone()).await {
                    Ok(()) => summary.pushed += 1,
                    Err(e) => {
                        warn!(%inode, %target, error = %e, "failed to push inode record to new owner");
                        summary.failed += 1;
                        all_pushed = false;
                    }
                }
            }
            settle(&mut self.retry.lock().inodes, inode, all_pushed);

            if !plan.keep && all_pushed {
                ctx.inodes.delete(inode).await?;
                summary.dropped += 1;
                debug!(%inode, "dropped inode record no longer owned");
            }
        }

        Ok(summary)
    }
}
