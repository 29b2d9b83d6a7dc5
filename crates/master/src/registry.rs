//! Maps shards to the slave links that serve them. Built once during
//! bring-up and read-only afterwards; no locking is needed beyond the
//! `Arc` each slave link is already wrapped in.

use std::collections::HashMap;
use std::sync::Arc;

use cluster_rpc::{Branch, ShardMask};

use crate::error::{MasterError, MasterResult};
use crate::slave_link::SlaveLink;

pub struct ClusterRegistry {
    shard_size: u32,
    slaves: Vec<Arc<SlaveLink>>,
    branch_to_slaves: HashMap<u32, Vec<Arc<SlaveLink>>>,
}

impl ClusterRegistry {
    /// Builds the shard-id -> slaves routing table from the connected
    /// links. A shard may be served by more than one slave (their masks
    /// are allowed to overlap); the invariant enforced here is only that
    /// every shard in `0..shard_size` has at least one owner.
    pub fn build(shard_size: u32, slaves: Vec<Arc<SlaveLink>>) -> MasterResult<ClusterRegistry> {
        let mut branch_to_slaves: HashMap<u32, Vec<Arc<SlaveLink>>> = HashMap::new();
        for shard_id in 0..shard_size {
            let owners: Vec<Arc<SlaveLink>> = slaves
                .iter()
                .filter(|link| link.has_shard(shard_id))
                .cloned()
                .collect();
            if owners.is_empty() {
                return Err(MasterError::IncompleteShardCoverage);
            }
            branch_to_slaves.insert(shard_id, owners);
        }
        Ok(ClusterRegistry {
            shard_size,
            slaves,
            branch_to_slaves,
        })
    }

    pub fn shard_size(&self) -> u32 {
        self.shard_size
    }

    pub fn slaves(&self) -> &[Arc<SlaveLink>] {
        &self.slaves
    }

    /// Every slave willing to serve `branch`, in declaration order.
    pub fn slaves_for_branch(&self, branch: Branch) -> MasterResult<&[Arc<SlaveLink>]> {
        self.branch_to_slaves
            .get(&branch.shard_id())
            .map(Vec::as_slice)
            .ok_or(MasterError::UnknownBranch(branch))
    }

    /// The slave a single-target RPC for `branch` is dispatched to: the
    /// first declared owner. Deterministic so repeated calls land on the
    /// same slave as long as the cluster topology hasn't changed.
    pub fn dispatch_slave(&self, branch: Branch) -> MasterResult<&Arc<SlaveLink>> {
        self.slaves_for_branch(branch)?
            .first()
            .ok_or(MasterError::UnknownBranch(branch))
    }

    /// Every slave whose declared masks overlap `mask`, used to fan a
    /// command out to every slave that could plausibly own a shard.
    pub fn slaves_overlapping(&self, mask: ShardMask) -> Vec<&Arc<SlaveLink>> {
        self.slaves
            .iter()
            .filter(|link| link.has_overlap(mask))
            .collect()
    }

    pub fn slave_by_id(&self, id: &str) -> Option<&Arc<SlaveLink>> {
        self.slaves.iter().find(|link| link.id == id)
    }

    /// Whether every shard in `0..shard_size` currently has a serving slave.
    /// Re-checked whenever a slave link is torn down.
    pub fn has_all_shards(&self) -> bool {
        (0..self.shard_size).all(|shard_id| {
            self.branch_to_slaves
                .get(&shard_id)
                .is_some_and(|owners| !owners.is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_rpc::SlaveInfo;

    fn fake_link(id: &str, masks: &[u32]) -> Arc<SlaveLink> {
        // SlaveLink has no public constructor outside `spawn` (which needs a
        // live stream); `test_only` builds a routing-only stand-in so these
        // tests can exercise shard lookup without opening a socket. `spawn`
        // itself is exercised by the master bring-up tests.
        Arc::new(SlaveLink::test_only(SlaveInfo {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            shard_masks: masks.iter().copied().map(cluster_rpc::ShardMask).collect(),
        }))
    }

    #[test]
    fn overlapping_masks_give_a_shard_more_than_one_owner() {
        // slave1 serves odd shards; slave2 serves the whole space, so shard
        // 1 has two willing owners and shard 0 has exactly one.
        let slave1 = fake_link("s1", &[0b11]);
        let slave2 = fake_link("s2", &[0b10, 0b11]);
        let registry = ClusterRegistry::build(2, vec![slave1, slave2]).unwrap();

        assert_eq!(registry.slaves_for_branch(Branch::create(2, 0)).unwrap().len(), 1);
        assert_eq!(registry.slaves_for_branch(Branch::create(2, 1)).unwrap().len(), 2);
        assert_eq!(registry.dispatch_slave(Branch::create(2, 0)).unwrap().id, "s2");
    }

    #[test]
    fn builds_routing_table_with_disjoint_masks() {
        let slave1 = fake_link("s1", &[0b10]); // even shards only
        let slave2 = fake_link("s2", &[0b11]); // odd shards only
        let registry = ClusterRegistry::build(2, vec![slave1, slave2]).unwrap();
        assert_eq!(
            registry.dispatch_slave(Branch::create(2, 0)).unwrap().id,
            "s1"
        );
        assert_eq!(
            registry.dispatch_slave(Branch::create(2, 1)).unwrap().id,
            "s2"
        );
        assert!(registry.has_all_shards());
    }

    #[test]
    fn missing_shard_owner_is_an_error() {
        let slave1 = fake_link("s1", &[0b10]); // even shards only, nobody owns odd
        let registry = ClusterRegistry::build(2, vec![slave1]);
        assert!(registry.is_err());
    }
}
