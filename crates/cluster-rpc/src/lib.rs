//! Wire protocol shared between the Master and its Slaves: branch/shard-mask
//! arithmetic, the frame envelope, the length-delimited codec that carries
//! it, and the per-operation request/response records.

pub mod branch;
pub mod codec;
pub mod domain;
pub mod frame;
pub mod messages;
pub mod ops;

pub use branch::{Branch, ShardMask, SlaveInfo, ROOT_BRANCH};
pub use codec::{framed_transport, FrameCodec};
pub use domain::{
    Address, BlockBytes, BlockHash, EcoInfo, HeadersInfo, MinorBlockHeader, RootBlock,
    RootBlockHeader, ShardStats, Transaction,
};
pub use frame::{ClusterMetadata, ClusterPeerId, Frame, FrameError, LOCAL_CLUSTER_PEER_ID};
pub use ops::ClusterOp;
