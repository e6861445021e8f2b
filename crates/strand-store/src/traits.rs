//! Core traits for local block and inode storage.

use bytes::Bytes;
use strand_types::{BlockRef, INodeRef};

use crate::error::StoreError;

/// Local storage for data blocks.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Data is passed as [`Bytes`] so payloads move between the network and the
/// store without copying.
#[async_trait::async_trait]
pub trait BlockStore: Send + Sync {
    /// Retrieve a block. Returns `None` if not held locally.
    async fn get(&self, key: BlockRef) -> Result<Option<Bytes>, StoreError>;

    /// Store a block, replacing any previous copy.
    async fn put(&self, key: BlockRef, data: Bytes) -> Result<(), StoreError>;

    /// Delete a block. Deleting a missing block is not an error.
    async fn delete(&self, key: BlockRef) -> Result<(), StoreError>;

    /// Check whether a block is held locally.
    async fn contains(&self, key: BlockRef) -> Result<bool, StoreError>;

    /// List every locally held block.
    async fn list(&self) -> Result<Vec<BlockRef>, StoreError>;

    /// Release the store. Called once per owner lifetime; a second call
    /// returns [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}

/// Local storage for encoded inode records.
#[async_trait::async_trait]
pub trait INodeStore: Send + Sync {
    /// Retrieve an inode record. Returns `None` if not held locally.
    async fn get(&self, inode: INodeRef) -> Result<Option<Bytes>, StoreError>;

    /// Store an inode record, replacing any previous version.
    async fn put(&self, inode: INodeRef, record: Bytes) -> Result<(), StoreError>;

    /// Delete an inode record.
    async fn delete(&self, inode: INodeRef) -> Result<(), StoreError>;

    /// Check whether an inode record is held locally.
    async fn contains(&self, inode: INodeRef) -> Result<bool, StoreError>;

    /// List every locally held inode record.
    async fn list(&self) -> Result<Vec<INodeRef>, StoreError>;

    /// Release the store. A second call returns [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}
