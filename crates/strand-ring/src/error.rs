//! Error types for ring operations.

use crate::ring::RingType;

/// Errors produced by ring construction, placement and mutation.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// Fewer distinct peers could be resolved than were requested.
    #[error("couldn't get sufficient peers: need {needed}, found {available}")]
    InsufficientPeers {
        /// Peers requested.
        needed: usize,
        /// Peers actually resolved.
        available: usize,
    },

    /// A membership change was requested that leaves the peer set as it was.
    #[error("no difference in membership")]
    NoMembershipChange,

    /// The ring algorithm does not support the requested operation.
    #[error("{operation} is not supported by {ring_type} rings")]
    Unsupported {
        /// Algorithm of the ring.
        ring_type: RingType,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// No constructor is registered for this type tag.
    #[error("unknown ring type: {0}")]
    UnknownRingType(RingType),

    /// The transportable form does not describe a valid ring of its type.
    #[error("invalid ring model: {0}")]
    InvalidModel(String),

    /// The ring version cannot be incremented any further.
    #[error("ring version exhausted at {0}")]
    VersionExhausted(u32),

    /// Serialization or deserialization of the transportable form failed.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),
}
