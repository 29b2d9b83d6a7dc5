//! The Master Orchestrator: cluster bring-up, readiness/shutdown signaling,
//! and fan-out of client and peer-lifecycle operations over the registry
//! built during bring-up.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use cluster_rpc::{Address, Branch, BlockBytes, ClusterPeerId, RootBlock, ShardMask, ShardStats, Transaction};
use futures::future::{FutureExt, Shared};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, OnceCell};

use crate::collaborators::{Network, RootState, ValidationError};
use crate::config::{ClusterConfig, MasterConfig};
use crate::dispatcher::{self, MiningCandidate};
use crate::error::{check, MasterError, MasterResult};
use crate::registry::ClusterRegistry;
use crate::root_block_queue::RootBlockUpdateQueue;
use crate::slave_link::{connect_with_retry, SlaveLink};

type ReadyResult = Result<(), String>;

/// Aggregated cluster statistics returned by [`Master::get_stats`].
#[derive(Debug, Clone)]
pub struct ClusterStats {
    pub shard_size: u32,
    pub root_height: u64,
    pub tx_count_60s: u64,
    pub shards: Vec<ShardStats>,
}

/// Lifecycle, fan-out, and peer-event entry point for the whole cluster.
///
/// Owns every [`SlaveLink`] (via the [`ClusterRegistry`]) and the root-block
/// serializer built from them. The Master outlives every link by
/// construction -- a link's non-owning `root_state`/`network` handles never
/// need to reach back through a `Master` reference, which is how the
/// Master<->SlaveLink cycle is broken.
pub struct Master {
    config: MasterConfig,
    cluster: ClusterConfig,
    root_state: Arc<dyn RootState>,
    network: Arc<dyn Network>,
    registry: OnceCell<ClusterRegistry>,
    root_block_queue: OnceCell<Arc<RootBlockUpdateQueue>>,
    ready_tx: Mutex<Option<oneshot::Sender<ReadyResult>>>,
    ready_rx: Shared<oneshot::Receiver<ReadyResult>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_rx: Shared<oneshot::Receiver<()>>,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        cluster: ClusterConfig,
        root_state: Arc<dyn RootState>,
        network: Arc<dyn Network>,
    ) -> Arc<Master> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Arc::new(Master {
            config,
            cluster,
            root_state,
            network,
            registry: OnceCell::new(),
            root_block_queue: OnceCell::new(),
            ready_tx: Mutex::new(Some(ready_tx)),
            ready_rx: ready_rx.shared(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx: shutdown_rx.shared(),
        })
    }

    /// Spawns the bring-up sequence in the background and returns
    /// immediately; callers await [`Master::wait_until_ready`] to learn when
    /// the cluster is serviceable (the JSON-RPC front end blocks on this
    /// before it starts serving).
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.bring_up().await });
    }

    /// Resolves once bring-up has either succeeded or failed.
    pub async fn wait_until_ready(&self) -> ReadyResult {
        self.ready_rx
            .clone()
            .await
            .unwrap_or_else(|_| Err("readiness signal was dropped".to_string()))
    }

    /// Resolves when the Master has shut down.
    pub async fn wait_for_shutdown(&self) {
        let _ = self.shutdown_rx.clone().await;
    }

    /// Idempotent. If the cluster never became ready, also resolves the
    /// readiness future with an error so waiters on it don't hang forever.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.ready_tx.lock().unwrap().take() {
            let _ = tx.send(Err("cluster shut down before becoming ready".to_string()));
        }
    }

    fn registry(&self) -> MasterResult<&ClusterRegistry> {
        self.registry.get().ok_or(MasterError::ClusterNotReady)
    }

    fn root_block_queue(&self) -> MasterResult<&Arc<RootBlockUpdateQueue>> {
        self.root_block_queue
            .get()
            .ok_or(MasterError::ClusterNotReady)
    }

    // ---- bring-up ---------------------------------------------------

    async fn bring_up(self: &Arc<Self>) {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<String>();

        let mut links = Vec::with_capacity(self.cluster.slaves.len());
        for info in &self.cluster.slaves {
            let stream =
                connect_with_retry(&info.host, info.port, self.config.connect_retry_delay).await;
            let link = SlaveLink::spawn(
                info.clone(),
                stream,
                Arc::clone(&self.root_state),
                Arc::clone(&self.network),
                closed_tx.clone(),
            );

            match link.ping().await {
                Ok((id, shard_masks))
                    if id == info.id && masks_match(&shard_masks, &info.shard_masks) => {}
                Ok((id, shard_masks)) => {
                    tracing::error!(
                        expected_id = %info.id,
                        got_id = %id,
                        expected_masks = ?info.shard_masks,
                        got_masks = ?shard_masks,
                        "slave handshake mismatch"
                    );
                    self.fail_bring_up(format!("slave {} handshake mismatch", info.id), true);
                    return;
                }
                Err(err) => {
                    tracing::error!(slave_id = %info.id, %err, "ping handshake failed");
                    self.fail_bring_up(format!("slave {} ping failed: {err}", info.id), true);
                    return;
                }
            }
            links.push(link);
        }

        // From this point on, losing any link is cluster-fatal (the design
        // is fail-stop: operators restart the Master rather than hot-swap a
        // dead slave).
        let watcher_self = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(slave_id) = closed_rx.recv().await {
                tracing::error!(slave_id, "slave link closed, shutting down master");
                watcher_self.shutdown();
            }
        });

        let registry = match ClusterRegistry::build(self.config.shard_size, links.clone()) {
            Ok(registry) => registry,
            Err(err) => {
                tracing::error!(%err, "cluster configuration does not cover every shard");
                self.fail_bring_up(err.to_string(), false);
                return;
            }
        };

        let all_slave_infos = self.cluster.slaves.clone();
        let mesh_results: Vec<(String, MasterResult<bool>)> =
            futures::future::join_all(links.iter().map(|link| {
                let infos = all_slave_infos.clone();
                async move { (link.id.clone(), link.connect_to_slaves(infos).await) }
            }))
            .await;
        for (slave_id, result) in mesh_results {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    tracing::error!(slave_id, "slave failed to mesh with its peers");
                    self.fail_bring_up(format!("slave {slave_id} failed mesh setup"), true);
                    return;
                }
                Err(err) => {
                    tracing::error!(slave_id, %err, "connect_to_slaves rpc failed");
                    self.fail_bring_up(
                        format!("slave {slave_id} connect_to_slaves rpc failed: {err}"),
                        true,
                    );
                    return;
                }
            }
        }

        let queue = Arc::new(RootBlockUpdateQueue::new(
            Arc::clone(&self.root_state),
            Arc::clone(&self.network),
            links,
        ));
        // Both cells are only ever written here, on the single bring-up
        // task, before the readiness future resolves.
        let _ = self.root_block_queue.set(queue);
        let _ = self.registry.set(registry);

        if let Some(tx) = self.ready_tx.lock().unwrap().take() {
            let _ = tx.send(Ok(()));
        }
        tracing::info!("cluster is ready");
    }

    /// Records a bring-up failure. `shutdown` distinguishes the fatal cases
    /// (handshake mismatch, mesh failure) which tear the whole Master down
    /// from missing shard coverage, which only aborts bring-up -- per the
    /// spec's error table, that case withholds shutdown-future resolution
    /// so a caller can tell the two failure modes apart.
    fn fail_bring_up(&self, reason: String, shutdown: bool) {
        if shutdown {
            self.shutdown();
        } else if let Some(tx) = self.ready_tx.lock().unwrap().take() {
            let _ = tx.send(Err(reason));
        }
    }

    // ---- client fan-out -----------------------------------------------

    pub async fn get_account_data(
        &self,
        address: Address,
    ) -> MasterResult<(Branch, cluster_rpc::messages::GetAccountDataResponse)> {
        let registry = self.registry()?;
        let shard_id = address.shard_id(registry.shard_size());
        let branch = Branch::create(registry.shard_size(), shard_id);
        let slave = registry.dispatch_slave(branch)?;
        let response = slave.get_account_data(address).await?;
        Ok((branch, response))
    }

    pub async fn get_transaction_count(&self, address: Address) -> MasterResult<u64> {
        Ok(self.get_account_data(address).await?.1.transaction_count)
    }

    pub async fn get_balance(&self, address: Address) -> MasterResult<u128> {
        Ok(self.get_account_data(address).await?.1.balance)
    }

    /// Fans `tx` out to every slave serving its branch (there may be more
    /// than one when shard masks overlap); succeeds only if every one of
    /// them accepts it. Unlike read paths and minor-block submission, which
    /// deterministically pick the first declared owner, writes of a
    /// transaction are mirrored to every replica.
    pub async fn add_transaction(&self, tx: Transaction) -> MasterResult<bool> {
        let registry = self.registry()?;
        let slaves = registry.slaves_for_branch(tx.branch)?;
        let mut replies = FuturesUnordered::new();
        for slave in slaves {
            let slave = Arc::clone(slave);
            let tx = tx.clone();
            replies.push(async move { slave.add_transaction(tx).await });
        }
        let mut all_ok = true;
        while let Some(result) = replies.next().await {
            all_ok &= result?;
        }
        Ok(all_ok)
    }

    pub async fn add_raw_minor_block(
        &self,
        branch: Branch,
        block_data: BlockBytes,
    ) -> MasterResult<bool> {
        let registry = self.registry()?;
        let slave = registry.dispatch_slave(branch)?;
        let response = slave.add_raw_minor_block(branch, block_data).await?;
        Ok(response.error_code == 0)
    }

    pub async fn get_stats(&self) -> MasterResult<ClusterStats> {
        let registry = self.registry()?;
        let mut replies = FuturesUnordered::new();
        for slave in registry.slaves() {
            let slave = Arc::clone(slave);
            replies.push(async move { slave.get_stats().await });
        }

        let mut by_branch: HashMap<Branch, ShardStats> = HashMap::new();
        while let Some(result) = replies.next().await {
            let response = result?;
            check(response.error_code == 0, "slave reported a GET_STATS error");
            for stats in response.shard_stats_list {
                by_branch.insert(stats.branch, stats);
            }
        }
        check(
            by_branch.len() as u32 == registry.shard_size(),
            format!(
                "expected stats for {} distinct shards, got {}",
                registry.shard_size(),
                by_branch.len()
            ),
        );

        let mut shards: Vec<ShardStats> = by_branch.into_values().collect();
        shards.sort_by_key(|s| s.branch.shard_id());
        let tx_count_60s = shards.iter().map(|s| s.tx_count_60s).sum();

        Ok(ClusterStats {
            shard_size: registry.shard_size(),
            root_height: self.root_state.tip().await.height,
            tx_count_60s,
            shards,
        })
    }

    // ---- peer lifecycle -------------------------------------------------

    pub async fn create_peer_cluster_connections(
        &self,
        cluster_peer_id: ClusterPeerId,
    ) -> MasterResult<()> {
        let registry = self.registry()?;
        let mut replies = FuturesUnordered::new();
        for slave in registry.slaves() {
            let slave = Arc::clone(slave);
            replies.push(async move { slave.create_peer_cluster_connection(cluster_peer_id).await });
        }
        while let Some(result) = replies.next().await {
            let response = result?;
            check(
                response.error_code == 0,
                "slave rejected CREATE_CLUSTER_PEER_CONNECTION",
            );
        }
        Ok(())
    }

    pub fn destroy_peer_cluster_connections(&self, cluster_peer_id: ClusterPeerId) -> MasterResult<()> {
        let registry = self.registry()?;
        for slave in registry.slaves() {
            slave.destroy_peer_cluster_connection(cluster_peer_id)?;
        }
        Ok(())
    }

    // ---- root chain -------------------------------------------------

    /// Validates `block`, propagating any `ValidationError` to the caller,
    /// then enqueues it and runs the drain inline if this call becomes the
    /// drainer. Only ever called after bring-up, since the JSON-RPC front
    /// end blocks on [`Master::wait_until_ready`] before accepting requests.
    pub async fn add_root_block(&self, block: RootBlock) -> Result<(), ValidationError> {
        self.root_block_queue()
            .expect("add_root_block called before the cluster finished bring-up")
            .add_root_block(block)
            .await
    }

    /// Fire-and-forget enqueue for a root block received from a peer or
    /// mined locally; the drain runs in the background.
    pub async fn update_root_block(self: &Arc<Self>, block: RootBlock) {
        let queue = Arc::clone(
            self.root_block_queue()
                .expect("update_root_block called before the cluster finished bring-up"),
        );
        queue.update_root_block(block).await;
    }

    // ---- mining dispatch -----------------------------------------------

    pub async fn get_next_block_to_mine(
        &self,
        address: Address,
        shard_mask_value: u32,
        randomize_output: bool,
        artificial_tx_count: u32,
    ) -> MasterResult<Option<MiningCandidate>> {
        let registry = self.registry()?;
        let mut rng = rand::thread_rng();
        Ok(dispatcher::get_next_block_to_mine(
            registry,
            &self.root_state,
            address,
            shard_mask_value,
            randomize_output,
            artificial_tx_count,
            self.config.proof_of_progress_blocks,
            &mut rng,
        )
        .await)
    }
}

fn masks_match(a: &[ShardMask], b: &[ShardMask]) -> bool {
    let a: HashSet<ShardMask> = a.iter().copied().collect();
    let b: HashSet<ShardMask> = b.iter().copied().collect();
    a == b
}
