use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cluster_rpc::{ShardMask, SlaveInfo};
use serde::Deserialize;

/// Default shard-address-space size and proof-of-progress threshold. These
/// mirror `quarkchain`'s `DEFAULT_ENV.config` values: they are environment
/// defaults, not CLI flags, and are only ever overridden by constructing a
/// `MasterConfig` directly (e.g. in tests).
pub const DEFAULT_SHARD_SIZE: u32 = 8;
pub const DEFAULT_PROOF_OF_PROGRESS_BLOCKS: u32 = 1;
pub const DEFAULT_MASTER_TO_SLAVE_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
struct SlaveConfigEntry {
    id: String,
    ip: String,
    port: u16,
    shard_masks: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClusterConfigFile {
    slaves: Vec<SlaveConfigEntry>,
}

/// The cluster configuration document loaded once at startup (see the JSON
/// shape in the wire-protocol external interfaces section).
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub slaves: Vec<SlaveInfo>,
}

impl ClusterConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<ClusterConfig> {
        let file = std::fs::File::open(path)
            .map_err(|err| anyhow::anyhow!("failed to open cluster config {path:?}: {err}"))?;
        let raw: ClusterConfigFile = serde_json::from_reader(file)
            .map_err(|err| anyhow::anyhow!("failed to parse cluster config {path:?}: {err}"))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: ClusterConfigFile) -> anyhow::Result<ClusterConfig> {
        anyhow::ensure!(!raw.slaves.is_empty(), "cluster config declares no slaves");

        let mut slaves = Vec::with_capacity(raw.slaves.len());
        for slave in raw.slaves {
            let host = Ipv4Addr::from_str(&slave.ip)
                .map_err(|err| anyhow::anyhow!("slave {}: invalid ip {}: {err}", slave.id, slave.ip))?
                .to_string();
            anyhow::ensure!(
                !slave.shard_masks.is_empty(),
                "slave {} declares no shard masks",
                slave.id
            );
            slaves.push(SlaveInfo {
                id: slave.id,
                host,
                port: slave.port,
                shard_masks: slave.shard_masks.into_iter().map(ShardMask).collect(),
            });
        }
        Ok(ClusterConfig { slaves })
    }
}

/// Whether to use an in-memory or persistent backing store. Storage itself
/// is out of scope for the Master; this is only the flag plumbing.
#[derive(Debug, Clone)]
pub enum DbConfig {
    InMemory,
    Persistent { path: PathBuf },
}

/// Fully resolved runtime configuration, assembled once in `main` from CLI
/// flags and environment defaults.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub server_port: u16,
    pub enable_local_server: bool,
    pub local_port: u16,
    pub seed_host: String,
    pub seed_port: u16,
    pub node_port: u16,
    pub db: DbConfig,
    pub shard_size: u32,
    pub proof_of_progress_blocks: u32,
    pub connect_retry_delay: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            server_port: 38291,
            enable_local_server: false,
            local_port: 38391,
            seed_host: String::new(),
            seed_port: 0,
            node_port: 38491,
            db: DbConfig::InMemory,
            shard_size: DEFAULT_SHARD_SIZE,
            proof_of_progress_blocks: DEFAULT_PROOF_OF_PROGRESS_BLOCKS,
            connect_retry_delay: DEFAULT_MASTER_TO_SLAVE_CONNECT_RETRY_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_cluster_config() {
        let raw: ClusterConfigFile = serde_json::from_str(
            r#"{ "slaves": [
                { "id": "s1", "ip": "127.0.0.1", "port": 9000, "shard_masks": [3] },
                { "id": "s2", "ip": "127.0.0.1", "port": 9001, "shard_masks": [2, 3] }
            ] }"#,
        )
        .unwrap();
        let config = ClusterConfig::from_raw(raw).unwrap();
        assert_eq!(config.slaves.len(), 2);
        assert_eq!(config.slaves[0].id, "s1");
        assert_eq!(config.slaves[1].shard_masks.len(), 2);
    }

    #[test]
    fn rejects_empty_slave_list() {
        let raw: ClusterConfigFile = serde_json::from_str(r#"{ "slaves": [] }"#).unwrap();
        assert!(ClusterConfig::from_raw(raw).is_err());
    }
}
