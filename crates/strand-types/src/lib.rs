//! Shared types and identifiers for Strand.
//!
//! This crate defines the value types used across the Strand workspace:
//! storage identifiers ([`INodeRef`], [`BlockRef`], [`RefType`]),
//! placement types ([`PeerList`], [`PeerPermutation`]),
//! and cluster types ([`PeerInfo`], [`GlobalMetadata`]).

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Storage identifiers
// ---------------------------------------------------------------------------

/// Identifier of an inode record: a volume and an inode number within it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct INodeRef {
    /// Volume the inode belongs to.
    pub volume: u64,
    /// Inode number within the volume.
    pub inode: u64,
}

impl INodeRef {
    /// Create a new inode reference.
    pub fn new(volume: u64, inode: u64) -> Self {
        Self { volume, inode }
    }
}

impl fmt::Display for INodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vol({}):inode({})", self.volume, self.inode)
    }
}

impl fmt::Debug for INodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INodeRef({self})")
    }
}

/// Kind of record a [`BlockRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[repr(u8)]
pub enum RefType {
    /// A data block belonging to a file.
    Data = 0,
    /// An inode record.
    INode = 1,
}

/// Length of the byte key a [`BlockRef`] reduces to.
pub const BLOCK_REF_BYTES: usize = 25;

/// Identifier of a stored block.
///
/// Reduces to a fixed-length byte key ([`BlockRef::to_bytes`]) that placement
/// algorithms hash to find the block's peers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockRef {
    /// Whether this block holds file data or an inode record.
    pub ref_type: RefType,
    /// The inode this block belongs to.
    pub inode: INodeRef,
    /// Position of the block within the inode.
    pub index: u64,
}

impl BlockRef {
    /// Reference to data block `index` of `inode`.
    pub fn data(inode: INodeRef, index: u64) -> Self {
        Self {
            ref_type: RefType::Data,
            inode,
            index,
        }
    }

    /// Placement key of an inode record.
    pub fn for_inode(inode: INodeRef) -> Self {
        Self {
            ref_type: RefType::INode,
            inode,
            index: 0,
        }
    }

    /// Fixed-length key: type byte, then volume, inode and index big-endian.
    pub fn to_bytes(&self) -> [u8; BLOCK_REF_BYTES] {
        let mut out = [0u8; BLOCK_REF_BYTES];
        out[0] = self.ref_type as u8;
        out[1..9].copy_from_slice(&self.inode.volume.to_be_bytes());
        out[9..17].copy_from_slice(&self.inode.inode.to_be_bytes());
        out[17..25].copy_from_slice(&self.index.to_be_bytes());
        out
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ref_type {
            RefType::Data => write!(f, "{}:block({})", self.inode, self.index),
            RefType::INode => write!(f, "{}:record", self.inode),
        }
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRef({self})")
    }
}

// ---------------------------------------------------------------------------
// Placement types
// ---------------------------------------------------------------------------

/// Ordered list of peer identifiers (node UUIDs).
///
/// Order matters for placement structures built from the list, but not for
/// membership: use [`PeerList::same_members`] to compare two lists as sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerList(Vec<String>);

impl PeerList {
    /// Create a peer list from identifiers, dropping duplicates (first wins).
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Self::default();
        for p in peers {
            let p = p.into();
            if !out.contains(&p) {
                out.0.push(p);
            }
        }
        out
    }

    /// Whether `peer` is in the list.
    pub fn contains(&self, peer: &str) -> bool {
        self.0.iter().any(|p| p == peer)
    }

    /// This list followed by every identifier of `other` not already present.
    pub fn union(&self, other: &PeerList) -> PeerList {
        let mut out = self.clone();
        for p in &other.0 {
            if !out.contains(p) {
                out.0.push(p.clone());
            }
        }
        out
    }

    /// This list without any identifier present in `other`.
    pub fn and_not(&self, other: &PeerList) -> PeerList {
        PeerList(
            self.0
                .iter()
                .filter(|p| !other.contains(p))
                .cloned()
                .collect(),
        )
    }

    /// Order-independent set equality.
    pub fn same_members(&self, other: &PeerList) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|p| other.contains(p))
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the identifiers in order.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// Borrow the identifiers as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consume the list, returning the identifiers.
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for PeerList {
    fn from(peers: Vec<String>) -> Self {
        Self::new(peers)
    }
}

impl<'a> IntoIterator for &'a PeerList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Ordered candidate peers for a key, paired with the intended replica count.
///
/// `peers[..replication]` is the placement set; the remainder is fallback
/// order for reads and repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPermutation {
    /// Every candidate peer, in placement order.
    pub peers: Vec<String>,
    /// How many leading peers should hold a copy.
    pub replication: usize,
}

impl PeerPermutation {
    /// The peers that should hold a copy.
    pub fn primaries(&self) -> &[String] {
        &self.peers[..self.replication.min(self.peers.len())]
    }

    /// Peers after the placement set, in fallback order.
    pub fn fallbacks(&self) -> &[String] {
        &self.peers[self.replication.min(self.peers.len())..]
    }

    /// Whether `peer` is part of the placement set.
    pub fn is_primary(&self, peer: &str) -> bool {
        self.primaries().iter().any(|p| p == peer)
    }
}

// ---------------------------------------------------------------------------
// Cluster types
// ---------------------------------------------------------------------------

/// Liveness record a node announces to the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The node's cluster identity.
    pub uuid: String,
    /// Address other peers use to reach the node's storage service.
    pub address: String,
    /// Unix timestamp (millis) of the last heartbeat.
    pub last_seen: u64,
    /// Blocks held by the node.
    pub total_blocks: u64,
    /// Inode records held by the node.
    pub total_inodes: u64,
}

/// Cluster-wide configuration held by the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMetadata {
    /// Number of peers that should hold each inode record.
    pub inode_replication: usize,
    /// Size of a data block in bytes.
    pub block_size: u64,
}

impl Default for GlobalMetadata {
    fn default() -> Self {
        Self {
            inode_replication: 3,
            block_size: 512 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
