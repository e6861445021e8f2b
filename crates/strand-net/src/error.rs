//! Error types for network operations.

use std::time::Duration;

use strand_meta::MetaError;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// A frame exceeded [`MAX_MESSAGE_SIZE`](crate::MAX_MESSAGE_SIZE).
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Announced or encoded size.
        size: usize,
        /// Largest accepted size.
        max: usize,
    },

    /// The peer answered with a message that does not match the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The peer failed to serve the request.
    #[error("remote error: {0}")]
    Remote(String),

    /// Opening a connection took too long.
    #[error("timed out connecting to {peer} after {timeout:?}")]
    ConnectTimeout {
        /// Peer being dialled.
        peer: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// No address is known for the peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The coordination service could not resolve peer addresses.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetaError),

    /// The client was closed.
    #[error("peer client is closed")]
    Closed,
}
