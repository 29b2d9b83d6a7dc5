use serde::{Deserialize, Serialize};

use crate::branch::Branch;

/// A 20-byte account address tagged with the full shard key used to derive
/// which shard it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub recipient: [u8; 20],
    pub full_shard_key: u32,
}

impl Address {
    pub fn new(recipient: [u8; 20], full_shard_key: u32) -> Self {
        Address {
            recipient,
            full_shard_key,
        }
    }

    /// The shard id this address belongs to, given the cluster's shard size.
    pub fn shard_id(self, shard_size: u32) -> u32 {
        self.full_shard_key % shard_size
    }

    /// This address rewritten to carry the full shard key of `branch`, for
    /// use as a coinbase recipient local to that branch.
    pub fn address_in_branch(self, branch: Branch) -> Address {
        Address {
            recipient: self.recipient,
            full_shard_key: branch.shard_id(),
        }
    }
}

pub type BlockHash = [u8; 32];

/// A validated minor-block header as reported by a slave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorBlockHeader {
    pub branch: Branch,
    pub height: u64,
    pub hash: BlockHash,
    pub coinbase_amount: u64,
}

/// Opaque, already-serialized minor or root block bytes (the Master never
/// inspects block contents beyond the fields it needs for dispatch).
pub type BlockBytes = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootBlockHeader {
    pub height: u64,
    pub hash: BlockHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootBlock {
    pub header: RootBlockHeader,
    pub minor_block_header_hashes: Vec<BlockHash>,
}

/// A transaction carrying an explicit branch so the Master never needs to
/// decode transaction payloads to route it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub branch: Branch,
    pub sender: Address,
    pub payload: Vec<u8>,
}

/// Per-shard economic snapshot used by the mining dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcoInfo {
    pub branch: Branch,
    pub height: u64,
    pub difficulty: u64,
    pub coinbase_amount: u64,
    pub unconfirmed_headers_coinbase_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersInfo {
    pub branch: Branch,
    pub header_list: Vec<MinorBlockHeader>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub branch: Branch,
    pub height: u64,
    pub tx_count_60s: u64,
}
