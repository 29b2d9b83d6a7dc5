use cluster_rpc::Branch;

/// Recoverable error surface the Master exposes to its callers (JSON-RPC
/// front end, P2P network collaborator, mining loop). Hard assertions
/// (divergent broadcast state, incomplete shard stats) are not represented
/// here -- they panic, per the "process should terminate with a
/// diagnostic" policy.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("branch {0:?} is not served by any slave")]
    UnknownBranch(Branch),

    #[error("rpc to slave {slave_id} failed")]
    SlaveRpcFailed {
        slave_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connection to slave {slave_id} was lost")]
    ConnectionLost { slave_id: String },

    #[error("slave {slave_id} handshake mismatch: {detail}")]
    HandshakeMismatch { slave_id: String, detail: String },

    #[error("slave {slave_id} failed to mesh with peers: {detail}")]
    MeshSetupFailed { slave_id: String, detail: String },

    #[error("cluster configuration is missing coverage for one or more shards")]
    IncompleteShardCoverage,

    #[error("cluster is not ready yet (bring-up has not completed)")]
    ClusterNotReady,

    #[error(transparent)]
    Frame(#[from] cluster_rpc::FrameError),
}

pub type MasterResult<T> = Result<T, MasterError>;

/// Panics with `message` if `condition` is false. Used for invariants whose
/// violation means the cluster has diverged (e.g. slaves disagreeing about
/// whether a root block applied) rather than something a caller can
/// meaningfully recover from; the process is expected to be restarted by
/// its supervisor.
#[track_caller]
pub fn check(condition: bool, message: impl std::fmt::Display) {
    if !condition {
        panic!("cluster invariant violated: {message}");
    }
}
