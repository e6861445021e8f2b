//! Coordination service contract.
//!
//! The coordination service is the authority for cluster-wide state: the
//! current ring, global configuration and peer liveness. Nodes talk to it
//! through the [`MetadataService`] trait. [`MemoryMetadataService`] is an
//! in-process implementation shared between the nodes of a single process
//! (tests, single-node deployments).

mod error;
mod memory;
mod service;

pub use error::MetaError;
pub use memory::MemoryMetadataService;
pub use service::MetadataService;
