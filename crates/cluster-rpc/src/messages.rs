use serde::{Deserialize, Serialize};

use crate::branch::{Branch, ShardMask, SlaveInfo};
use crate::domain::{
    Address, BlockBytes, EcoInfo, HeadersInfo, MinorBlockHeader, RootBlock, ShardStats,
    Transaction,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub id: String,
    pub shard_masks: Vec<ShardMask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectToSlavesRequest {
    pub slaves: Vec<SlaveInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectToSlavesResponse {
    /// One slot per target in the request; empty string means success.
    pub result_list: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetEcoInfoListRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEcoInfoListResponse {
    pub error_code: u32,
    pub eco_info_list: Vec<EcoInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNextBlockToMineRequest {
    pub branch: Branch,
    pub address: Address,
    pub artificial_tx_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNextBlockToMineResponse {
    pub error_code: u32,
    pub block: Option<BlockBytes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetUnconfirmedHeadersRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUnconfirmedHeadersResponse {
    pub error_code: u32,
    pub headers_info_list: Vec<HeadersInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAccountDataRequest {
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAccountDataResponse {
    pub error_code: u32,
    pub balance: u128,
    pub transaction_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTransactionRequest {
    pub tx: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTransactionResponse {
    pub error_code: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRootBlockRequest {
    pub root_block: RootBlock,
    pub expect_switch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRootBlockResponse {
    pub error_code: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMinorBlockRequest {
    pub block_data: BlockBytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMinorBlockResponse {
    pub error_code: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMinorBlockHeaderRequest {
    pub minor_block_header: MinorBlockHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMinorBlockHeaderResponse {
    pub error_code: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterPeerConnectionRequest {
    pub cluster_peer_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterPeerConnectionResponse {
    pub error_code: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyClusterPeerConnectionCommand {
    pub cluster_peer_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetStatsRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStatsResponse {
    pub error_code: u32,
    pub shard_stats_list: Vec<ShardStats>,
}
