//! Serializes root-block application behind a FIFO queue so the
//! `RootState` collaborator only ever sees one `add_block` call in flight
//! at a time, no matter how many slaves report new root blocks
//! concurrently. The first caller to find the queue idle becomes the
//! drainer and keeps draining -- applying locally, then broadcasting to
//! every slave -- until the queue is empty again, even if other callers
//! append to it while it runs.

use std::collections::VecDeque;
use std::sync::Arc;

use cluster_rpc::RootBlock;
use tokio::sync::Mutex;

use crate::collaborators::{Network, RootState, ValidationError};
use crate::error::check;
use crate::slave_link::SlaveLink;

struct QueueState {
    queue: VecDeque<RootBlock>,
    draining: bool,
}

pub struct RootBlockUpdateQueue {
    state: Mutex<QueueState>,
    root_state: Arc<dyn RootState>,
    network: Arc<dyn Network>,
    slaves: Vec<Arc<SlaveLink>>,
}

impl RootBlockUpdateQueue {
    pub fn new(
        root_state: Arc<dyn RootState>,
        network: Arc<dyn Network>,
        slaves: Vec<Arc<SlaveLink>>,
    ) -> RootBlockUpdateQueue {
        RootBlockUpdateQueue {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                draining: false,
            }),
            root_state,
            network,
            slaves,
        }
    }

    /// Fire-and-forget enqueue: appends `block` and, if this call becomes
    /// the drainer, spawns the drain loop in the background rather than
    /// waiting on it. Used when a slave reports a root block asynchronously.
    pub async fn update_root_block(self: &Arc<Self>, block: RootBlock) {
        let should_drain = self.push(block).await;
        if should_drain {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drain().await });
        }
    }

    /// Validating enqueue used by the JSON-RPC `add_root_block` entry
    /// point: propagates validation failure to the caller. If this call
    /// becomes the drainer it awaits the full drain before returning;
    /// otherwise (another drain is already in flight) it returns as soon
    /// as the block is queued, matching `update_root_block`'s semantics
    /// for every queue entry after the first.
    pub async fn add_root_block(self: &Arc<Self>, block: RootBlock) -> Result<(), ValidationError> {
        self.root_state.validate_block(&block).await?;
        let should_drain = self.push(block).await;
        if should_drain {
            self.drain().await;
        }
        Ok(())
    }

    /// Appends `block`, returning whether the caller must run the drain
    /// loop (true iff no other drainer is currently active).
    async fn push(self: &Arc<Self>, block: RootBlock) -> bool {
        let mut state = self.state.lock().await;
        state.queue.push_back(block);
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    async fn drain(self: &Arc<Self>) {
        let mut tip_advanced = false;
        loop {
            let next = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(block) => block,
                    None => {
                        state.draining = false;
                        break;
                    }
                }
            };

            match self.root_state.add_block(next.clone()).await {
                Ok(updated) => {
                    tip_advanced |= updated;
                    self.broadcast_to_slaves(next).await;
                }
                Err(err) => {
                    tracing::warn!(%err, "discarding root block that failed validation");
                }
            }
        }

        if tip_advanced {
            for peer in self.network.iterate_peers().await {
                if let Err(err) = peer.send_updated_tip().await {
                    tracing::warn!(
                        peer = peer.cluster_peer_id(),
                        %err,
                        "failed to notify peer of updated root tip"
                    );
                }
            }
        }
    }

    async fn broadcast_to_slaves(&self, block: RootBlock) {
        let mut replies = futures::stream::FuturesUnordered::new();
        for slave in &self.slaves {
            let slave = Arc::clone(slave);
            let block = block.clone();
            replies.push(async move { slave.add_root_block(block, false).await });
        }
        use futures::StreamExt;
        while let Some(result) = replies.next().await {
            match result {
                Ok(resp) => check(resp.error_code == 0, "slave rejected a root block the master already applied"),
                Err(err) => tracing::error!(%err, "slave unreachable while broadcasting root block"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cluster_rpc::{Address, BlockHash, HeadersInfo, RootBlockHeader};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeRootState {
        applied: AsyncMutex<Vec<RootBlock>>,
        next_height: AtomicU64,
    }

    #[async_trait]
    impl RootState for FakeRootState {
        async fn add_block(&self, block: RootBlock) -> Result<bool, ValidationError> {
            let mut applied = self.applied.lock().await;
            let became_tip = block.header.height > applied.last().map_or(0, |b| b.header.height);
            applied.push(block);
            Ok(became_tip)
        }

        async fn validate_block(&self, _block: &RootBlock) -> Result<(), ValidationError> {
            Ok(())
        }

        async fn create_block_to_mine(
            &self,
            _headers: Vec<HeadersInfo>,
            _address: Address,
        ) -> anyhow::Result<RootBlock> {
            unimplemented!("not exercised by the queue tests")
        }

        async fn add_validated_minor_block_hash(&self, _hash: BlockHash) {}

        async fn next_block_difficulty(&self) -> u64 {
            self.next_height.fetch_add(1, Ordering::Relaxed)
        }

        async fn tip(&self) -> RootBlockHeader {
            let applied = self.applied.lock().await;
            applied
                .last()
                .map(|b| b.header.clone())
                .unwrap_or(RootBlockHeader {
                    height: 0,
                    hash: [0u8; 32],
                })
        }
    }

    struct FakeNetwork {
        notified: AsyncMutex<u32>,
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn get_peer_by_cluster_peer_id(
            &self,
            _id: cluster_rpc::ClusterPeerId,
        ) -> Option<Arc<dyn crate::collaborators::Peer>> {
            None
        }

        async fn iterate_peers(&self) -> Vec<Arc<dyn crate::collaborators::Peer>> {
            *self.notified.lock().await += 1;
            Vec::new()
        }
    }

    fn root_block(height: u64) -> RootBlock {
        let mut hash = [0u8; 32];
        hash[0..8].copy_from_slice(&height.to_be_bytes());
        RootBlock {
            header: RootBlockHeader { height, hash },
            minor_block_header_hashes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn drains_every_enqueued_block_exactly_once() {
        let root_state = Arc::new(FakeRootState {
            applied: AsyncMutex::new(Vec::new()),
            next_height: AtomicU64::new(0),
        });
        let network = Arc::new(FakeNetwork {
            notified: AsyncMutex::new(0),
        });
        let queue = Arc::new(RootBlockUpdateQueue::new(
            root_state.clone(),
            network.clone(),
            Vec::new(),
        ));

        queue.add_root_block(root_block(1)).await.unwrap();
        queue.add_root_block(root_block(2)).await.unwrap();
        queue.add_root_block(root_block(3)).await.unwrap();

        let applied = root_state.applied.lock().await;
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[0].header.height, 1);
        assert_eq!(applied[2].header.height, 3);
        // Every call increased the tip, so the drain should broadcast once
        // after the loop, not once per block.
        assert_eq!(*network.notified.lock().await, 1);
    }

    #[tokio::test]
    async fn sync_add_root_block_propagates_validation_failure() {
        struct RejectingRootState;

        #[async_trait]
        impl RootState for RejectingRootState {
            async fn add_block(&self, _block: RootBlock) -> Result<bool, ValidationError> {
                unreachable!("validate_block rejects before add_block runs")
            }
            async fn validate_block(&self, _block: &RootBlock) -> Result<(), ValidationError> {
                Err(ValidationError("bad root block".to_string()))
            }
            async fn create_block_to_mine(
                &self,
                _headers: Vec<HeadersInfo>,
                _address: Address,
            ) -> anyhow::Result<RootBlock> {
                unimplemented!()
            }
            async fn add_validated_minor_block_hash(&self, _hash: BlockHash) {}
            async fn next_block_difficulty(&self) -> u64 {
                0
            }
            async fn tip(&self) -> RootBlockHeader {
                RootBlockHeader {
                    height: 0,
                    hash: [0u8; 32],
                }
            }
        }

        let network = Arc::new(FakeNetwork {
            notified: AsyncMutex::new(0),
        });
        let queue = Arc::new(RootBlockUpdateQueue::new(
            Arc::new(RejectingRootState),
            network,
            Vec::new(),
        ));
        let result = queue.add_root_block(root_block(1)).await;
        assert!(result.is_err());
    }
}
