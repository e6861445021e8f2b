//! The [`Ring`] trait, its transportable form and mutation hooks.

use std::fmt;

use serde::{Deserialize, Serialize};
use strand_types::{BlockRef, PeerList, PeerPermutation};

use crate::error::RingError;

/// Type tag identifying a placement algorithm.
///
/// Tags travel inside [`RingModel`] so any node can rebuild the same ring.
/// New algorithms pick an unused tag and register a constructor with the
/// [`RingRegistry`](crate::RingRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RingType(pub u32);

impl RingType {
    /// One fixed peer.
    pub const SINGLE: RingType = RingType(1);
    /// Consistent hash ring with virtual nodes.
    pub const KETAMA: RingType = RingType(2);

    /// Human-readable algorithm name for built-in tags.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::SINGLE => Some("single"),
            Self::KETAMA => Some("ketama"),
            _ => None,
        }
    }
}

impl fmt::Display for RingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "ring-type({})", self.0),
        }
    }
}

impl From<u32> for RingType {
    fn from(tag: u32) -> Self {
        Self(tag)
    }
}

/// Transportable form of a ring.
///
/// This is what the coordination service stores and broadcasts. It carries
/// everything needed to rebuild a ring that answers `get_peers` identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingModel {
    /// Algorithm tag ([`RingType`]).
    pub ring_type: u32,
    /// Ring version.
    pub version: u32,
    /// Replication factor (0 is read as 1).
    pub replication_factor: u32,
    /// Member UUIDs in order.
    pub uuids: Vec<String>,
}

impl RingModel {
    /// Encode with postcard.
    pub fn marshal(&self) -> Result<Vec<u8>, RingError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode a postcard-encoded model.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, RingError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// The algorithm tag as a [`RingType`].
    pub fn ring_type(&self) -> RingType {
        RingType(self.ring_type)
    }
}

/// Deterministic placement of blocks onto a versioned set of peers.
///
/// A published ring is shared as `Arc<dyn Ring>` and never mutated.
/// Membership changes go through [`Ring::add_peers`] / [`Ring::remove_peers`],
/// which return a fresh ring at `version + 1`.
pub trait Ring: Send + Sync + fmt::Debug {
    /// Algorithm tag.
    fn ring_type(&self) -> RingType;

    /// Version of this ring in its lineage.
    fn version(&self) -> u32;

    /// Number of leading peers of a permutation that should hold a copy.
    fn replication(&self) -> usize;

    /// Current members, in ring order.
    fn members(&self) -> PeerList;

    /// Every member ordered by placement preference for `key`.
    ///
    /// Fails with [`RingError::InsufficientPeers`] if the ring cannot resolve
    /// as many distinct peers as it has members (e.g. an empty ring).
    fn get_peers(&self, key: &BlockRef) -> Result<PeerPermutation, RingError>;

    /// A new ring with `peers` added, at `version + 1`.
    ///
    /// Fails with [`RingError::NoMembershipChange`] if every peer is already
    /// a member. Each hook in `mods` runs once, in order, on the new ring.
    fn add_peers(
        &self,
        peers: &PeerList,
        mods: &[&dyn RingModification],
    ) -> Result<Box<dyn Ring>, RingError>;

    /// A new ring with `peers` removed, at `version + 1`.
    ///
    /// Fails with [`RingError::NoMembershipChange`] if none of the peers is a
    /// member. Each hook in `mods` runs once, in order, on the new ring.
    fn remove_peers(
        &self,
        peers: &PeerList,
        mods: &[&dyn RingModification],
    ) -> Result<Box<dyn Ring>, RingError>;

    /// Set the replication factor in place. The version is not bumped.
    fn change_replication(&mut self, replication: usize);

    /// Human-readable dump for operators.
    fn describe(&self) -> String;

    /// Transportable form of this ring.
    fn to_model(&self) -> Result<RingModel, RingError> {
        Ok(RingModel {
            ring_type: self.ring_type().0,
            version: self.version(),
            replication_factor: replication_factor(self.replication())?,
            uuids: self.members().into_vec(),
        })
    }

    /// Postcard-encoded transportable form.
    fn marshal(&self) -> Result<Vec<u8>, RingError> {
        self.to_model()?.marshal()
    }
}

/// Convert a replication factor to its wire width.
pub(crate) fn replication_factor(replication: usize) -> Result<u32, RingError> {
    u32::try_from(replication).map_err(|_| {
        RingError::InvalidModel(format!(
            "replication factor {replication} does not fit in 32 bits"
        ))
    })
}

/// Side effect attached to a membership change.
///
/// Hooks run on the new ring after it is fully built and before it is handed
/// back to the caller, so they can adjust policy (e.g. replication) as part of
/// the same version.
pub trait RingModification: Send + Sync {
    /// Apply the hook to a freshly built ring.
    fn modify_ring(&self, ring: &mut dyn Ring);
}

impl<F> RingModification for F
where
    F: Fn(&mut dyn Ring) + Send + Sync,
{
    fn modify_ring(&self, ring: &mut dyn Ring) {
        self(ring)
    }
}

/// Hook that sets the replication factor of the new ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationChange(pub usize);

impl RingModification for ReplicationChange {
    fn modify_ring(&self, ring: &mut dyn Ring) {
        ring.change_replication(self.0);
    }
}
