//! Stand-ins for the `RootState` and `Network` collaborators this crate
//! depends on but does not implement -- the root-chain validation engine and
//! the P2P network library are both explicitly out of scope (see the
//! top-level design notes). The binary wires these in so the Master can run
//! end to end without either attached; a production deployment swaps both
//! out for the real implementations.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cluster_rpc::{Address, BlockHash, ClusterPeerId, HeadersInfo, RootBlock, RootBlockHeader};
use tokio::sync::Mutex;

use crate::collaborators::{Network, Peer, RootState, ValidationError};

/// Tracks only the root chain's tip height/hash and the set of minor-block
/// hashes slaves have reported as validated -- enough to drive bring-up,
/// the mining dispatcher, and the root-block serializer without a real
/// consensus/state-machine implementation behind it.
pub struct StubRootState {
    tip_height: AtomicU64,
    tip_hash: Mutex<BlockHash>,
    validated_minor_hashes: Mutex<HashSet<BlockHash>>,
}

impl StubRootState {
    pub fn new() -> Self {
        StubRootState {
            tip_height: AtomicU64::new(0),
            tip_hash: Mutex::new([0u8; 32]),
            validated_minor_hashes: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for StubRootState {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RootState for StubRootState {
    async fn add_block(&self, block: RootBlock) -> Result<bool, ValidationError> {
        let updated = block.header.height > self.tip_height.load(Ordering::SeqCst);
        if updated {
            self.tip_height.store(block.header.height, Ordering::SeqCst);
            *self.tip_hash.lock().await = block.header.hash;
        }
        Ok(updated)
    }

    async fn validate_block(&self, _block: &RootBlock) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn create_block_to_mine(
        &self,
        headers: Vec<HeadersInfo>,
        _address: Address,
    ) -> anyhow::Result<RootBlock> {
        let height = self.tip_height.load(Ordering::SeqCst) + 1;
        let mut hash = [0u8; 32];
        hash[0..8].copy_from_slice(&height.to_be_bytes());
        let minor_block_header_hashes = headers
            .into_iter()
            .flat_map(|info| info.header_list.into_iter().map(|h| h.hash))
            .collect();
        Ok(RootBlock {
            header: RootBlockHeader { height, hash },
            minor_block_header_hashes,
        })
    }

    async fn add_validated_minor_block_hash(&self, hash: BlockHash) {
        self.validated_minor_hashes.lock().await.insert(hash);
    }

    async fn next_block_difficulty(&self) -> u64 {
        1
    }

    async fn tip(&self) -> RootBlockHeader {
        RootBlockHeader {
            height: self.tip_height.load(Ordering::SeqCst),
            hash: *self.tip_hash.lock().await,
        }
    }
}

/// No-op network collaborator: the P2P plane is out of scope, so there are
/// never any peers to resolve or notify.
pub struct StubNetwork;

#[async_trait]
impl Network for StubNetwork {
    async fn get_peer_by_cluster_peer_id(&self, _id: ClusterPeerId) -> Option<Arc<dyn Peer>> {
        None
    }

    async fn iterate_peers(&self) -> Vec<Arc<dyn Peer>> {
        Vec::new()
    }
}
