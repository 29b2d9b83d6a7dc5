use serde::{Deserialize, Serialize};

/// Operation code carried by every frame on the intra-cluster wire protocol.
///
/// RPC ops are sent with `rpc_id = Some(_)` and awaited by the caller;
/// command ops are fire-and-forget (`rpc_id = None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClusterOp {
    Ping = 0,
    ConnectToSlaves = 1,
    GetEcoInfoList = 2,
    GetNextBlockToMine = 3,
    GetUnconfirmedHeaders = 4,
    GetAccountData = 5,
    AddTransaction = 6,
    AddRootBlock = 7,
    AddMinorBlock = 8,
    /// Inbound only: a slave reports a newly mined minor block header.
    AddMinorBlockHeader = 9,
    CreateClusterPeerConnection = 10,
    /// Command (no response expected).
    DestroyClusterPeerConnection = 11,
    GetStats = 12,
}

impl ClusterOp {
    /// Whether this op is a fire-and-forget command rather than an RPC.
    pub fn is_command(self) -> bool {
        matches!(self, ClusterOp::DestroyClusterPeerConnection)
    }
}
