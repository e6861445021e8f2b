//! Error types for the coordination service.

use strand_ring::RingError;

/// Errors returned by [`MetadataService`](crate::MetadataService) operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// A ring was published whose version is not newer than the current one.
    #[error("ring version conflict: current {current}, proposed {proposed}")]
    VersionConflict {
        /// Version currently held by the service.
        current: u32,
        /// Version that was rejected.
        proposed: u32,
    },

    /// The published ring does not decode into a working ring.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// The service could not be reached or answered with a failure.
    #[error("metadata service unavailable: {0}")]
    Unavailable(String),
}
