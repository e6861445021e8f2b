//! Per-node distributor.
//!
//! The [`Distributor`] is the single entry point of a storage node: it owns
//! the local block and inode stores, serves them to other peers over the
//! storage protocol, tracks the cluster ring published by the coordination
//! service, and routes reads and writes to the peers the ring designates.
//!
//! Ring changes are applied by a background watcher and handed one at a
//! time to a [`Rebalancer`], which moves locally held data to its new
//! owners. [`ReplicationRebalancer`] is the built-in implementation.

mod config;
mod distributor;
mod error;
mod handler;
mod rebalancer;

#[cfg(test)]
mod tests;

pub use config::{DistributorConfig, WriteLevel};
pub use distributor::{DEFAULT_INODE_REPLICATION, Distributor, NodeServices, inode_permutation};
pub use error::DistributorError;
pub use handler::LocalStorage;
pub use rebalancer::{
    NoopRebalancer, RebalanceContext, RebalanceSummary, Rebalancer, ReplicationRebalancer,
};
