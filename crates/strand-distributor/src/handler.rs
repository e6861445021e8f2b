//! Storage protocol handler backed by the local stores.

use std::sync::Arc;

use bytes::Bytes;
use strand_net::{HandlerError, StorageHandler};
use strand_store::{BlockStore, INodeStore};
use strand_types::{BlockRef, INodeRef};
use tracing::debug;

/// Answers remote storage requests from this node's stores.
///
/// Requests are never forwarded: a peer asking for a block this node does
/// not hold gets `None` and moves on to the next peer in its permutation.
pub struct LocalStorage {
    blocks: Arc<dyn BlockStore>,
    inodes: Arc<dyn INodeStore>,
}

impl LocalStorage {
    /// Serve the given stores.
    pub fn new(blocks: Arc<dyn BlockStore>, inodes: Arc<dyn INodeStore>) -> Self {
        Self { blocks, inodes }
    }
}

#[async_trait::async_trait]
impl StorageHandler for LocalStorage {
    async fn get_block(&self, key: BlockRef) -> Result<Option<Bytes>, HandlerError> {
        Ok(self.blocks.get(key).await?)
    }

    async fn put_block(&self, key: BlockRef, data: Bytes) -> Result<(), HandlerError> {
        debug!(%key, size = data.len(), "storing block from peer");
        Ok(self.blocks.put(key, data).await?)
    }

    async fn get_inode(&self, inode: INodeRef) -> Result<Option<Bytes>, HandlerError> {
        Ok(self.inodes.get(inode).await?)
    }

    async fn put_inode(&self, inode: INodeRef, record: Bytes) -> Result<(), HandlerError> {
        debug!(%inode, "storing inode record from peer");
        Ok(self.inodes.put(inode, record).await?)
    }
}
