//! Local storage engines for blocks and inode records.
//!
//! This crate defines the [`BlockStore`] and [`INodeStore`] traits a node
//! uses to hold its share of the cluster's data, along with in-memory
//! backends:
//!
//! - [`MemoryBlockStore`] keyed by [`BlockRef`](strand_types::BlockRef).
//! - [`MemoryINodeStore`] keyed by [`INodeRef`](strand_types::INodeRef).
//!
//! Both stores refuse every operation with [`StoreError::Closed`] once
//! closed.

mod error;
mod memory_store;
mod traits;

pub use error::StoreError;
pub use memory_store::{MemoryBlockStore, MemoryINodeStore};
pub use traits::{BlockStore, INodeStore};
