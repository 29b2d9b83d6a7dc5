use serde::{de::DeserializeOwned, Serialize};

use crate::branch::{Branch, ROOT_BRANCH};
use crate::ops::ClusterOp;

/// `0` is reserved and means "not associated with any peer"; it addresses
/// the Master itself (Master<->Slave traffic never carries a real peer id).
pub type ClusterPeerId = u64;

pub const LOCAL_CLUSTER_PEER_ID: ClusterPeerId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClusterMetadata {
    pub branch: Branch,
    pub cluster_peer_id: ClusterPeerId,
}

impl ClusterMetadata {
    pub fn local(branch: Branch) -> Self {
        ClusterMetadata {
            branch,
            cluster_peer_id: LOCAL_CLUSTER_PEER_ID,
        }
    }

    pub fn root() -> Self {
        Self::local(ROOT_BRANCH)
    }
}

/// One frame on the intra-cluster wire. `rpc_id` is `Some` for RPC
/// request/response pairs (caller awaits a matching response) and `None`
/// for one-way commands.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Frame {
    pub op: ClusterOp,
    pub metadata: ClusterMetadata,
    pub rpc_id: Option<u64>,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to encode frame payload")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode frame payload")]
    Decode(#[source] bincode::Error),
}

impl Frame {
    pub fn new_rpc<T: Serialize>(
        op: ClusterOp,
        rpc_id: u64,
        metadata: ClusterMetadata,
        body: &T,
    ) -> Result<Self, FrameError> {
        Ok(Frame {
            op,
            metadata,
            rpc_id: Some(rpc_id),
            payload: bincode::serialize(body).map_err(FrameError::Encode)?,
        })
    }

    pub fn new_command<T: Serialize>(
        op: ClusterOp,
        metadata: ClusterMetadata,
        body: &T,
    ) -> Result<Self, FrameError> {
        Ok(Frame {
            op,
            metadata,
            rpc_id: None,
            payload: bincode::serialize(body).map_err(FrameError::Encode)?,
        })
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        bincode::deserialize(&self.payload).map_err(FrameError::Decode)
    }

    /// Whether this frame targets a remote peer rather than the Master
    /// itself (see the forwarding rule in the Slave Link design).
    pub fn is_forwarded(&self) -> bool {
        self.metadata.cluster_peer_id != LOCAL_CLUSTER_PEER_ID
    }
}
