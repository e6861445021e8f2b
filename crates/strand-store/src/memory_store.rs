//! In-memory storage backends.

use std::collections::HashMap;
use std::hash::Hash;

use bytes::Bytes;
use parking_lot::RwLock;
use strand_types::{BlockRef, INodeRef};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{BlockStore, INodeStore};

/// Map that becomes unusable once closed (`None`).
struct Slots<K> {
    map: RwLock<Option<HashMap<K, Bytes>>>,
}

impl<K: Eq + Hash + Copy> Slots<K> {
    fn new() -> Self {
        Self {
            map: RwLock::new(Some(HashMap::new())),
        }
    }

    fn get(&self, key: &K) -> Result<Option<Bytes>, StoreError> {
        let map = self.map.read();
        let map = map.as_ref().ok_or(StoreError::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: K, data: Bytes) -> Result<(), StoreError> {
        let mut map = self.map.write();
        map.as_mut().ok_or(StoreError::Closed)?.insert(key, data);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), StoreError> {
        let mut map = self.map.write();
        map.as_mut().ok_or(StoreError::Closed)?.remove(key);
        Ok(())
    }

    fn contains(&self, key: &K) -> Result<bool, StoreError> {
        let map = self.map.read();
        Ok(map.as_ref().ok_or(StoreError::Closed)?.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<K>, StoreError> {
        let map = self.map.read();
        Ok(map.as_ref().ok_or(StoreError::Closed)?.keys().copied().collect())
    }

    fn close(&self) -> Result<usize, StoreError> {
        let held = self.map.write().take().ok_or(StoreError::Closed)?;
        Ok(held.len())
    }
}

/// In-memory block store backed by a `RwLock<HashMap>`.
///
/// Useful for testing and for nodes running without durable storage.
pub struct MemoryBlockStore {
    blocks: Slots<BlockRef>,
}

impl MemoryBlockStore {
    /// Create an empty block store.
    pub fn new() -> Self {
        Self {
            blocks: Slots::new(),
        }
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlockStore for MemoryBlockStore {
    async fn get(&self, key: BlockRef) -> Result<Option<Bytes>, StoreError> {
        self.blocks.get(&key)
    }

    async fn put(&self, key: BlockRef, data: Bytes) -> Result<(), StoreError> {
        debug!(%key, size = data.len(), "storing block in memory");
        self.blocks.put(key, data)
    }

    async fn delete(&self, key: BlockRef) -> Result<(), StoreError> {
        self.blocks.delete(&key)?;
        debug!(%key, "deleted block from memory");
        Ok(())
    }

    async fn contains(&self, key: BlockRef) -> Result<bool, StoreError> {
        self.blocks.contains(&key)
    }

    async fn list(&self) -> Result<Vec<BlockRef>, StoreError> {
        self.blocks.keys()
    }

    async fn close(&self) -> Result<(), StoreError> {
        let dropped = self.blocks.close()?;
        debug!(blocks = dropped, "closed memory block store");
        Ok(())
    }
}

/// In-memory inode record store.
pub struct MemoryINodeStore {
    records: Slots<INodeRef>,
}

impl MemoryINodeStore {
    /// Create an empty inode store.
    pub fn new() -> Self {
        Self {
            records: Slots::new(),
        }
    }
}

impl Default for MemoryINodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl INodeStore for MemoryINodeStore {
    async fn get(&self, inode: INodeRef) -> Result<Option<Bytes>, StoreError> {
        self.records.get(&inode)
    }

    async fn put(&self, inode: INodeRef, record: Bytes) -> Result<(), StoreError> {
        debug!(%inode, size = record.len(), "storing inode record in memory");
        self.records.put(inode, record)
    }

    async fn delete(&self, inode: INodeRef) -> Result<(), StoreError> {
        self.records.delete(&inode)
    }

    async fn contains(&self, inode: INodeRef) -> Result<bool, StoreError> {
        self.records.contains(&inode)
    }

    async fn list(&self) -> Result<Vec<INodeRef>, StoreError> {
        self.records.keys()
    }

    async fn close(&self) -> Result<(), StoreError> {
        let dropped = self.records.close()?;
        debug!(records = dropped, "closed memory inode store");
        Ok(())
    }
}
