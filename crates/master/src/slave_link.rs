use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cluster_rpc::messages::AddMinorBlockHeaderResponse;
use cluster_rpc::{
    Branch, ClusterMetadata, ClusterOp, ClusterPeerId, Frame, FrameCodec, ShardMask, SlaveInfo,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::collaborators::{Network, NullSink, RootState};
use crate::error::{MasterError, MasterResult};

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>>;

/// Runtime peer object for one long-lived connection to a single slave.
///
/// Holds its callbacks (`root_state`, `network`) as non-owning `Arc`
/// handles rather than a back-reference to the Master, which breaks the
/// Master<->SlaveLink reference cycle the design calls for: the Master
/// outlives every link by construction and tears the whole process down as
/// soon as any one of them dies.
pub struct SlaveLink {
    pub id: String,
    pub shard_masks: Vec<ShardMask>,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: PendingTable,
    next_rpc_id: AtomicU64,
}

/// Retries a TCP connect forever with a fixed delay, per the bring-up
/// policy: transient I/O errors are never fatal during dial.
pub async fn connect_with_retry(host: &str, port: u16, retry_delay: Duration) -> TcpStream {
    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return stream,
            Err(err) => {
                tracing::warn!(host, port, %err, "failed to connect to slave, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

impl SlaveLink {
    /// Spawns the reader/writer tasks for an already-connected stream.
    /// `on_closed` is signaled exactly once, with this link's id, the
    /// moment the underlying stream is lost -- callers use that to trigger
    /// Master shutdown.
    pub fn spawn(
        info: SlaveInfo,
        stream: TcpStream,
        root_state: Arc<dyn RootState>,
        network: Arc<dyn Network>,
        on_closed: mpsc::UnboundedSender<String>,
    ) -> Arc<SlaveLink> {
        let (read_half, write_half) = stream.into_split();
        let mut framed_read = FramedRead::new(read_half, FrameCodec::default());
        let mut framed_write = FramedWrite::new(write_half, FrameCodec::default());

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

        let link = Arc::new(SlaveLink {
            id: info.id.clone(),
            shard_masks: info.shard_masks.clone(),
            outbound: outbound_tx,
            pending: pending.clone(),
            next_rpc_id: AtomicU64::new(1),
        });

        // Single writer task: the only place frames are ever written to the
        // stream, so no two tasks can race on the sink.
        tokio::spawn(async move {
            use futures::SinkExt;
            while let Some(frame) = outbound_rx.recv().await {
                if framed_write.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let reader_id = info.id.clone();
        let reader_outbound = link.outbound.clone();
        tokio::spawn(async move {
            use futures::StreamExt;
            loop {
                match framed_read.next().await {
                    Some(Ok(frame)) => {
                        handle_inbound_frame(
                            frame,
                            &pending,
                            &root_state,
                            &network,
                            &reader_outbound,
                        )
                        .await;
                    }
                    Some(Err(err)) => {
                        tracing::error!(slave_id = %reader_id, %err, "slave link read error");
                        break;
                    }
                    None => break,
                }
            }
            // Stream is gone. Fail every outstanding awaiter and tell the
            // Master this is cluster-fatal.
            let mut pending = pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx; // dropping the sender fails the awaiter with RecvError
            }
            drop(pending);
            let _ = on_closed.send(reader_id);
        });

        link
    }

    /// A routing-only stand-in with no live connection, for registry tests
    /// that exercise shard-mask lookup and never call an RPC method.
    #[cfg(test)]
    pub fn test_only(info: SlaveInfo) -> SlaveLink {
        let (outbound, _receiver) = mpsc::unbounded_channel();
        SlaveLink {
            id: info.id,
            shard_masks: info.shard_masks,
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_rpc_id: AtomicU64::new(1),
        }
    }

    pub fn has_shard(&self, shard_id: u32) -> bool {
        self.shard_masks.iter().any(|m| m.contains_shard_id(shard_id))
    }

    pub fn has_overlap(&self, mask: ShardMask) -> bool {
        self.shard_masks.iter().any(|m| m.has_overlap(mask))
    }

    fn allocate_rpc_id(&self) -> u64 {
        self.next_rpc_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends an RPC request and awaits its matching response.
    pub async fn write_rpc<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        op: ClusterOp,
        metadata: ClusterMetadata,
        request: &Req,
    ) -> MasterResult<Resp> {
        let rpc_id = self.allocate_rpc_id();
        let frame = Frame::new_rpc(op, rpc_id, metadata, request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(rpc_id, tx);

        if self.outbound.send(frame).is_err() {
            self.pending.lock().await.remove(&rpc_id);
            return Err(MasterError::ConnectionLost {
                slave_id: self.id.clone(),
            });
        }

        let response_frame = rx.await.map_err(|_| MasterError::ConnectionLost {
            slave_id: self.id.clone(),
        })?;
        Ok(response_frame.decode_payload()?)
    }

    /// Sends a one-way command; no response is awaited.
    pub fn write_command<Req: Serialize>(
        &self,
        op: ClusterOp,
        metadata: ClusterMetadata,
        request: &Req,
    ) -> MasterResult<()> {
        let frame = Frame::new_command(op, metadata, request)?;
        self.outbound
            .send(frame)
            .map_err(|_| MasterError::ConnectionLost {
                slave_id: self.id.clone(),
            })
    }

    pub async fn ping(&self) -> MasterResult<(String, Vec<ShardMask>)> {
        let resp: cluster_rpc::messages::PingResponse = self
            .write_rpc(
                ClusterOp::Ping,
                ClusterMetadata::root(),
                &cluster_rpc::messages::PingRequest,
            )
            .await?;
        Ok((resp.id, resp.shard_masks))
    }

    pub async fn connect_to_slaves(&self, slaves: Vec<SlaveInfo>) -> MasterResult<bool> {
        let count = slaves.len();
        let req = cluster_rpc::messages::ConnectToSlavesRequest { slaves };
        let resp: cluster_rpc::messages::ConnectToSlavesResponse = self
            .write_rpc(ClusterOp::ConnectToSlaves, ClusterMetadata::root(), &req)
            .await?;
        assert_eq!(
            resp.result_list.len(),
            count,
            "slave {} returned a mismatched result count for connect_to_slaves",
            self.id
        );
        for (target, result) in resp.result_list.iter().enumerate() {
            if !result.is_empty() {
                tracing::error!(
                    slave_id = %self.id,
                    target,
                    error = %result,
                    "slave failed to connect to a peer slave"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn get_account_data(
        &self,
        address: cluster_rpc::Address,
    ) -> MasterResult<cluster_rpc::messages::GetAccountDataResponse> {
        let req = cluster_rpc::messages::GetAccountDataRequest { address };
        self.write_rpc(ClusterOp::GetAccountData, ClusterMetadata::root(), &req)
            .await
    }

    pub async fn add_transaction(&self, tx: cluster_rpc::Transaction) -> MasterResult<bool> {
        let req = cluster_rpc::messages::AddTransactionRequest { tx };
        let resp: cluster_rpc::messages::AddTransactionResponse = self
            .write_rpc(ClusterOp::AddTransaction, ClusterMetadata::root(), &req)
            .await?;
        Ok(resp.error_code == 0)
    }

    pub async fn get_eco_info_list(
        &self,
    ) -> MasterResult<cluster_rpc::messages::GetEcoInfoListResponse> {
        self.write_rpc(
            ClusterOp::GetEcoInfoList,
            ClusterMetadata::root(),
            &cluster_rpc::messages::GetEcoInfoListRequest,
        )
        .await
    }

    pub async fn get_unconfirmed_headers(
        &self,
    ) -> MasterResult<cluster_rpc::messages::GetUnconfirmedHeadersResponse> {
        self.write_rpc(
            ClusterOp::GetUnconfirmedHeaders,
            ClusterMetadata::root(),
            &cluster_rpc::messages::GetUnconfirmedHeadersRequest,
        )
        .await
    }

    pub async fn get_next_block_to_mine(
        &self,
        branch: Branch,
        address: cluster_rpc::Address,
        artificial_tx_count: u32,
    ) -> MasterResult<cluster_rpc::messages::GetNextBlockToMineResponse> {
        let req = cluster_rpc::messages::GetNextBlockToMineRequest {
            branch,
            address,
            artificial_tx_count,
        };
        self.write_rpc(
            ClusterOp::GetNextBlockToMine,
            ClusterMetadata::local(branch),
            &req,
        )
        .await
    }

    pub async fn add_root_block(
        &self,
        root_block: cluster_rpc::RootBlock,
        expect_switch: bool,
    ) -> MasterResult<cluster_rpc::messages::AddRootBlockResponse> {
        let req = cluster_rpc::messages::AddRootBlockRequest {
            root_block,
            expect_switch,
        };
        self.write_rpc(ClusterOp::AddRootBlock, ClusterMetadata::root(), &req)
            .await
    }

    pub async fn add_raw_minor_block(
        &self,
        branch: Branch,
        block_data: cluster_rpc::BlockBytes,
    ) -> MasterResult<cluster_rpc::messages::AddMinorBlockResponse> {
        let req = cluster_rpc::messages::AddMinorBlockRequest { block_data };
        self.write_rpc(
            ClusterOp::AddMinorBlock,
            ClusterMetadata::local(branch),
            &req,
        )
        .await
    }

    pub async fn get_stats(&self) -> MasterResult<cluster_rpc::messages::GetStatsResponse> {
        self.write_rpc(
            ClusterOp::GetStats,
            ClusterMetadata::root(),
            &cluster_rpc::messages::GetStatsRequest,
        )
        .await
    }

    pub async fn create_peer_cluster_connection(
        &self,
        cluster_peer_id: ClusterPeerId,
    ) -> MasterResult<cluster_rpc::messages::CreateClusterPeerConnectionResponse> {
        let req = cluster_rpc::messages::CreateClusterPeerConnectionRequest { cluster_peer_id };
        self.write_rpc(
            ClusterOp::CreateClusterPeerConnection,
            ClusterMetadata::root(),
            &req,
        )
        .await
    }

    pub fn destroy_peer_cluster_connection(&self, cluster_peer_id: ClusterPeerId) -> MasterResult<()> {
        let cmd = cluster_rpc::messages::DestroyClusterPeerConnectionCommand { cluster_peer_id };
        self.write_command(
            ClusterOp::DestroyClusterPeerConnection,
            ClusterMetadata::root(),
            &cmd,
        )
    }
}

/// Applies the forwarding rule to one inbound frame: frames addressed to a
/// real peer are routed there (or dropped on the floor if that peer is
/// already gone); frames addressed to the Master itself (`cluster_peer_id ==
/// 0`) are either a response to one of our own pending RPCs, or one of the
/// small set of RPCs a slave may send inbound.
async fn handle_inbound_frame(
    frame: Frame,
    pending: &PendingTable,
    root_state: &Arc<dyn RootState>,
    network: &Arc<dyn Network>,
    outbound: &mpsc::UnboundedSender<Frame>,
) {
    if frame.is_forwarded() {
        match network
            .get_peer_by_cluster_peer_id(frame.metadata.cluster_peer_id)
            .await
        {
            Some(peer) => {
                if let Err(err) = peer.forward(frame).await {
                    tracing::warn!(%err, "failed to forward frame to peer");
                }
            }
            None => NullSink::forward(frame).await,
        }
        return;
    }

    if frame.op == ClusterOp::AddMinorBlockHeader {
        handle_add_minor_block_header(frame, root_state, outbound).await;
        return;
    }

    let Some(rpc_id) = frame.rpc_id else {
        tracing::warn!("received a non-rpc frame with no local handler, dropping");
        return;
    };
    let awaiter = pending.lock().await.remove(&rpc_id);
    match awaiter {
        Some(tx) => {
            let _ = tx.send(frame);
        }
        None => {
            tracing::warn!(rpc_id, "received a response with no matching pending rpc");
        }
    }
}

async fn handle_add_minor_block_header(
    frame: Frame,
    root_state: &Arc<dyn RootState>,
    outbound: &mpsc::UnboundedSender<Frame>,
) {
    let rpc_id = frame.rpc_id;
    let req: Result<cluster_rpc::messages::AddMinorBlockHeaderRequest, _> = frame.decode_payload();
    let response = match req {
        Ok(req) => {
            root_state
                .add_validated_minor_block_hash(req.minor_block_header.hash)
                .await;
            AddMinorBlockHeaderResponse { error_code: 0 }
        }
        Err(err) => {
            tracing::error!(%err, "failed to decode ADD_MINOR_BLOCK_HEADER_REQUEST payload");
            AddMinorBlockHeaderResponse { error_code: 1 }
        }
    };
    let Ok(response_frame) = Frame::new_rpc(
        ClusterOp::AddMinorBlockHeader,
        rpc_id.unwrap_or_default(),
        ClusterMetadata::root(),
        &response,
    ) else {
        return;
    };
    let _ = outbound.send(response_frame);
}

