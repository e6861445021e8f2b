//! Error types for the distributor.

use strand_types::{BlockRef, INodeRef};

/// Errors that can occur during distributor operations.
#[derive(Debug, thiserror::Error)]
pub enum DistributorError {
    /// Placement or ring decoding failed.
    #[error("ring error: {0}")]
    Ring(#[from] strand_ring::RingError),

    /// A local store failed.
    #[error("store error: {0}")]
    Store(#[from] strand_store::StoreError),

    /// The coordination service failed.
    #[error("metadata error: {0}")]
    Meta(#[from] strand_meta::MetaError),

    /// A peer could not be reached or failed the request.
    #[error("network error: {0}")]
    Net(#[from] strand_net::NetError),

    /// No peer in the permutation holds the block.
    #[error("block not found: {0}")]
    BlockNotFound(BlockRef),

    /// No peer in the permutation holds the inode record.
    #[error("inode not found: {0}")]
    INodeNotFound(INodeRef),

    /// Fewer copies were written than the write level requires.
    #[error("write of {target} failed: {succeeded} of {needed} copies written")]
    WriteFailed {
        /// What was being written.
        target: String,
        /// Copies required by the write level.
        needed: usize,
        /// Copies actually written.
        succeeded: usize,
    },

    /// The distributor has been closed.
    #[error("distributor is closed")]
    Closed,
}
