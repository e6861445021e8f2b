//! Protocol messages for the storage service.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strand_types::{BlockRef, INodeRef};

/// Messages exchanged between peers.
///
/// Every request is answered by exactly one response on the same
/// connection, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMessage {
    /// Read a block from the peer's local store.
    GetBlock {
        /// Block to read.
        key: BlockRef,
    },

    /// Write a block to the peer's local store (answered by [`Ack`](Self::Ack)).
    PutBlock {
        /// Block to write.
        key: BlockRef,
        /// Block payload.
        data: Bytes,
    },

    /// Read an inode record from the peer's local store.
    GetINode {
        /// Record to read.
        inode: INodeRef,
    },

    /// Write an inode record to the peer's local store.
    PutINode {
        /// Record to write.
        inode: INodeRef,
        /// Encoded record.
        record: Bytes,
    },

    /// Health check.
    Ping {
        /// Timestamp (millis since epoch) when the ping was sent.
        timestamp: u64,
    },

    /// Response to [`GetBlock`](Self::GetBlock).
    Block {
        /// Block that was requested.
        key: BlockRef,
        /// The payload, or `None` if the peer does not hold it.
        data: Option<Bytes>,
    },

    /// Response to [`GetINode`](Self::GetINode).
    INode {
        /// Record that was requested.
        inode: INodeRef,
        /// The record, or `None` if the peer does not hold it.
        record: Option<Bytes>,
    },

    /// A write was applied.
    Ack,

    /// Response to [`Ping`](Self::Ping), echoing its timestamp.
    Pong {
        /// Timestamp from the ping.
        timestamp: u64,
    },

    /// The request failed on the peer.
    Error {
        /// Description of the failure.
        message: String,
    },
}

impl StorageMessage {
    /// Short variant name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetBlock { .. } => "GetBlock",
            Self::PutBlock { .. } => "PutBlock",
            Self::GetINode { .. } => "GetINode",
            Self::PutINode { .. } => "PutINode",
            Self::Ping { .. } => "Ping",
            Self::Block { .. } => "Block",
            Self::INode { .. } => "INode",
            Self::Ack => "Ack",
            Self::Pong { .. } => "Pong",
            Self::Error { .. } => "Error",
        }
    }
}
