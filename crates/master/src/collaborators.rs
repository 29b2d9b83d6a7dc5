//! External collaborators the Master depends on but does not own: the
//! root-state engine that validates/extends the root chain, and the P2P
//! network library that owns peer connections. Both are out of scope for
//! this crate -- only the operation set named in the spec is modeled here,
//! as async traits the binary wires up to real implementations.

use async_trait::async_trait;
use cluster_rpc::{ClusterPeerId, Frame, HeadersInfo, RootBlock, RootBlockHeader};

#[derive(Debug, thiserror::Error)]
#[error("root block failed validation: {0}")]
pub struct ValidationError(pub String);

/// The root-state engine: validates and extends the root chain. Treated as
/// an opaque collaborator; the Master never inspects its internals beyond
/// this operation set.
#[async_trait]
pub trait RootState: Send + Sync {
    /// Applies `block`, returning whether it updated the chain tip.
    /// `Err` signals a validation failure, which callers must treat as
    /// "discard this block and keep draining", not as fatal.
    async fn add_block(&self, block: RootBlock) -> Result<bool, ValidationError>;

    /// Validates `block` without applying it; propagates failures to the
    /// caller of the synchronous `add_root_block` entry point.
    async fn validate_block(&self, block: &RootBlock) -> Result<(), ValidationError>;

    /// Builds a mineable root block out of every shard's unconfirmed
    /// headers, concatenated in shard-id order.
    async fn create_block_to_mine(
        &self,
        headers: Vec<HeadersInfo>,
        address: cluster_rpc::Address,
    ) -> anyhow::Result<RootBlock>;

    /// Records a minor-block header hash as validated, so a subsequent root
    /// block may reference it.
    async fn add_validated_minor_block_hash(&self, hash: cluster_rpc::BlockHash);

    async fn next_block_difficulty(&self) -> u64;

    async fn tip(&self) -> RootBlockHeader;
}

/// A single connected remote peer, and a valid forwarding target for
/// slave-originated traffic.
#[async_trait]
pub trait Peer: Send + Sync {
    fn cluster_peer_id(&self) -> ClusterPeerId;

    /// Writes `frame` unchanged to this peer's connection.
    async fn forward(&self, frame: Frame) -> anyhow::Result<()>;

    /// Notifies this peer that the root chain tip advanced.
    async fn send_updated_tip(&self) -> anyhow::Result<()>;
}

/// The P2P network collaborator: owns peer connections and resolves
/// `ClusterPeerId`s to live peers.
#[async_trait]
pub trait Network: Send + Sync {
    async fn get_peer_by_cluster_peer_id(&self, id: ClusterPeerId) -> Option<std::sync::Arc<dyn Peer>>;

    async fn iterate_peers(&self) -> Vec<std::sync::Arc<dyn Peer>>;
}

/// A conceptual drop target for frames whose peer has already disconnected:
/// acknowledges the send but discards the bytes, so a slave forwarding to a
/// departed peer is never back-pressured.
pub struct NullSink;

impl NullSink {
    pub async fn forward(_frame: Frame) {}
}
