//! Master coordinator for a sharded blockchain cluster: brings up the
//! configured slave set, maintains the root chain, dispatches mining work,
//! and fans client/peer traffic out to the right slave.

pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod root_block_queue;
pub mod slave_link;
pub mod stub;

pub use collaborators::{Network, Peer, RootState, ValidationError};
pub use config::{ClusterConfig, DbConfig, MasterConfig};
pub use dispatcher::MiningCandidate;
pub use error::{MasterError, MasterResult};
pub use orchestrator::{ClusterStats, Master};
pub use registry::ClusterRegistry;
pub use root_block_queue::RootBlockUpdateQueue;
pub use slave_link::SlaveLink;
