//! Storage protocol between peers.
//!
//! Peers forward block and inode reads and writes to each other over plain
//! TCP:
//!
//! - [`StorageMessage`] is the wire protocol (postcard, length-prefixed).
//! - [`StorageServer`] accepts connections and dispatches requests to a
//!   [`StorageHandler`].
//! - [`PeerClient`] keeps a pool of connections to peers, resolving their
//!   addresses through the coordination service.

mod client;
mod codec;
mod error;
mod message;
mod server;

pub use client::{CONNECT_TIMEOUT, PeerClient};
pub use codec::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use error::NetError;
pub use message::StorageMessage;
pub use server::{HandlerError, StorageHandler, StorageServer};
