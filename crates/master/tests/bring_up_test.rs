//! End-to-end bring-up scenarios driven over real loopback TCP connections
//! against a minimal fake slave, exercising the handshake, mesh setup, and
//! fail-stop shutdown contracts described in the orchestrator design.

use std::sync::Arc;
use std::time::Duration;

use cluster_rpc::messages::{ConnectToSlavesRequest, ConnectToSlavesResponse, PingResponse};
use cluster_rpc::{framed_transport, ClusterMetadata, ClusterOp, Frame, ShardMask, SlaveInfo};
use futures::{SinkExt, StreamExt};
use master::config::{ClusterConfig, MasterConfig};
use master::stub::{StubNetwork, StubRootState};
use master::Master;
use tokio::net::TcpListener;

/// Spawns a fake slave that answers PING with `ping_id`/`masks` and
/// CONNECT_TO_SLAVES with a failure at `mesh_fail_index` (if any), then
/// either keeps the connection open or closes it right after meshing,
/// depending on `close_after_mesh`.
async fn spawn_fake_slave(
    ping_id: &'static str,
    masks: Vec<ShardMask>,
    mesh_fail_index: Option<usize>,
    close_after_mesh: bool,
) -> (String, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = framed_transport(stream);
        while let Some(Ok(frame)) = framed.next().await {
            match frame.op {
                ClusterOp::Ping => {
                    let resp = PingResponse {
                        id: ping_id.to_string(),
                        shard_masks: masks.clone(),
                    };
                    let reply = Frame::new_rpc(
                        ClusterOp::Ping,
                        frame.rpc_id.unwrap(),
                        ClusterMetadata::root(),
                        &resp,
                    )
                    .unwrap();
                    framed.send(reply).await.unwrap();
                }
                ClusterOp::ConnectToSlaves => {
                    let req: ConnectToSlavesRequest = frame.decode_payload().unwrap();
                    let mut result_list = vec![String::new(); req.slaves.len()];
                    if let Some(idx) = mesh_fail_index {
                        if let Some(slot) = result_list.get_mut(idx) {
                            *slot = "peer unreachable".to_string();
                        }
                    }
                    let resp = ConnectToSlavesResponse { result_list };
                    let reply = Frame::new_rpc(
                        ClusterOp::ConnectToSlaves,
                        frame.rpc_id.unwrap(),
                        ClusterMetadata::root(),
                        &resp,
                    )
                    .unwrap();
                    framed.send(reply).await.unwrap();
                    if close_after_mesh {
                        return;
                    }
                }
                _ => {}
            }
        }
    });

    ("127.0.0.1".to_string(), port)
}

fn single_slave_cluster(id: &str, host: String, port: u16, masks: Vec<ShardMask>) -> ClusterConfig {
    ClusterConfig {
        slaves: vec![SlaveInfo {
            id: id.to_string(),
            host,
            port,
            shard_masks: masks,
        }],
    }
}

fn test_master(cluster: ClusterConfig, shard_size: u32) -> Arc<Master> {
    let mut config = MasterConfig::default();
    config.shard_size = shard_size;
    config.connect_retry_delay = Duration::from_millis(10);
    Master::new(
        config,
        cluster,
        Arc::new(StubRootState::new()),
        Arc::new(StubNetwork),
    )
}

#[tokio::test]
async fn bring_up_succeeds_with_matching_handshake_and_mesh() {
    let (host, port) = spawn_fake_slave("s1", vec![ShardMask(0b1)], None, false).await;
    let cluster = single_slave_cluster("s1", host, port, vec![ShardMask(0b1)]);
    let master = test_master(cluster, 1);

    master.start();
    assert!(master.wait_until_ready().await.is_ok());
}

#[tokio::test]
async fn handshake_mismatch_rejects_readiness_and_shuts_down() {
    // Slave reports id "s2" but the config declared "s1" -- a fatal
    // handshake mismatch (B2 from the testable-properties scenarios).
    let (host, port) = spawn_fake_slave("s2", vec![ShardMask(0b1)], None, false).await;
    let cluster = single_slave_cluster("s1", host, port, vec![ShardMask(0b1)]);
    let master = test_master(cluster, 1);

    master.start();
    assert!(master.wait_until_ready().await.is_err());
    master.wait_for_shutdown().await;
}

#[tokio::test]
async fn mesh_failure_rejects_readiness_and_shuts_down() {
    let (host, port) = spawn_fake_slave("s1", vec![ShardMask(0b1)], Some(0), false).await;
    let cluster = single_slave_cluster("s1", host, port, vec![ShardMask(0b1)]);
    let master = test_master(cluster, 1);

    master.start();
    assert!(master.wait_until_ready().await.is_err());
    master.wait_for_shutdown().await;
}

#[tokio::test]
async fn missing_shard_coverage_aborts_bring_up_without_shutdown() {
    // SHARD_SIZE=2 but the only slave's mask only covers even shards, so
    // shard 1 is never claimed -- bring-up aborts but this is not a fatal
    // shutdown per the spec's error table.
    let (host, port) = spawn_fake_slave("s1", vec![ShardMask(0b10)], None, false).await;
    let cluster = single_slave_cluster("s1", host, port, vec![ShardMask(0b10)]);
    let master = test_master(cluster, 2);

    master.start();
    assert!(master.wait_until_ready().await.is_err());

    let resolved = tokio::time::timeout(Duration::from_millis(50), master.wait_for_shutdown()).await;
    assert!(resolved.is_err(), "shutdown future must not resolve for missing shard coverage");
}

#[tokio::test]
async fn slave_link_loss_after_ready_triggers_shutdown() {
    let (host, port) = spawn_fake_slave("s1", vec![ShardMask(0b1)], None, true).await;
    let cluster = single_slave_cluster("s1", host, port, vec![ShardMask(0b1)]);
    let master = test_master(cluster, 1);

    master.start();
    assert!(master.wait_until_ready().await.is_ok());

    // The fake slave closes its socket right after meshing; the Master
    // must treat that as cluster-fatal and resolve its shutdown future.
    tokio::time::timeout(Duration::from_secs(5), master.wait_for_shutdown())
        .await
        .expect("shutdown future should resolve once the slave link drops");
}
