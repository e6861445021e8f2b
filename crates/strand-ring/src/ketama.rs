//! Consistent hashing ring implementation.

use std::collections::BTreeMap;

use strand_types::{BlockRef, PeerList, PeerPermutation};
use tracing::debug;

use crate::error::RingError;
use crate::ring::{Ring, RingModel, RingModification, RingType};

/// Virtual positions each peer occupies on the ring.
pub const VNODES_PER_PEER: u16 = 160;

/// Consistent hashing ring.
///
/// Each peer is mapped to [`VNODES_PER_PEER`] virtual nodes on a u64 ring.
/// A key's permutation is found by walking clockwise from the key's position
/// and collecting distinct physical peers until every member is listed.
#[derive(Debug, Clone)]
pub struct Ketama {
    version: u32,
    replication: usize,
    peers: PeerList,
    /// Virtual node positions: ring position -> index into `peers`.
    vnodes: BTreeMap<u64, usize>,
}

impl Ketama {
    /// Build a ring over `peers`. A replication factor of 0 is read as 1.
    pub fn new(version: u32, replication: usize, peers: PeerList) -> Self {
        let mut vnodes: BTreeMap<u64, usize> = BTreeMap::new();
        for (idx, peer) in peers.iter().enumerate() {
            for i in 0..VNODES_PER_PEER {
                let pos = vnode_position(peer, i);
                // On a position collision the smaller uuid wins, so placement
                // does not depend on the order peers were listed in.
                match vnodes.get(&pos) {
                    Some(&other) if peers.as_slice()[other] <= *peer => {}
                    _ => {
                        vnodes.insert(pos, idx);
                    }
                }
            }
        }

        Self {
            version,
            replication: replication.max(1),
            peers,
            vnodes,
        }
    }

    /// Registry constructor.
    pub fn from_model(model: &RingModel) -> Result<Box<dyn Ring>, RingError> {
        if model.ring_type() != RingType::KETAMA {
            return Err(RingError::InvalidModel(format!(
                "expected {} model, got {}",
                RingType::KETAMA,
                model.ring_type()
            )));
        }
        Ok(Box::new(Self::new(
            model.version,
            model.replication_factor as usize,
            PeerList::new(model.uuids.iter().cloned()),
        )))
    }

    /// Return the total number of vnodes in the ring.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// Build the successor ring for a membership change.
    fn successor(
        &self,
        peers: PeerList,
        mods: &[&dyn RingModification],
    ) -> Result<Box<dyn Ring>, RingError> {
        if peers.same_members(&self.peers) {
            return Err(RingError::NoMembershipChange);
        }
        let version = self
            .version
            .checked_add(1)
            .ok_or(RingError::VersionExhausted(self.version))?;

        let mut next: Box<dyn Ring> = Box::new(Ketama::new(version, self.replication, peers));
        for m in mods {
            m.modify_ring(next.as_mut());
        }

        debug!(
            from = self.version,
            to = version,
            peers = next.members().len(),
            "built successor ring"
        );
        Ok(next)
    }
}

impl Ring for Ketama {
    fn ring_type(&self) -> RingType {
        RingType::KETAMA
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn replication(&self) -> usize {
        self.replication
    }

    fn members(&self) -> PeerList {
        self.peers.clone()
    }

    fn get_peers(&self, key: &BlockRef) -> Result<PeerPermutation, RingError> {
        let needed = self.peers.len();
        if needed == 0 {
            return Err(RingError::InsufficientPeers {
                needed: 1,
                available: 0,
            });
        }

        let pos = key_position(key);
        let mut found: Vec<String> = Vec::with_capacity(needed);

        // BTreeMap::range gives us everything >= pos, then we wrap around.
        let after = self.vnodes.range(pos..);
        let before = self.vnodes.range(..pos);

        for (_, &idx) in after.chain(before) {
            let peer = &self.peers.as_slice()[idx];
            if !found.contains(peer) {
                found.push(peer.clone());
                if found.len() == needed {
                    break;
                }
            }
        }

        if found.len() < needed {
            return Err(RingError::InsufficientPeers {
                needed,
                available: found.len(),
            });
        }

        Ok(PeerPermutation {
            peers: found,
            replication: self.replication,
        })
    }

    fn add_peers(
        &self,
        peers: &PeerList,
        mods: &[&dyn RingModification],
    ) -> Result<Box<dyn Ring>, RingError> {
        self.successor(self.peers.union(peers), mods)
    }

    fn remove_peers(
        &self,
        peers: &PeerList,
        mods: &[&dyn RingModification],
    ) -> Result<Box<dyn Ring>, RingError> {
        self.successor(self.peers.and_not(peers), mods)
    }

    fn change_replication(&mut self, replication: usize) {
        self.replication = replication.max(1);
    }

    fn describe(&self) -> String {
        let mut s = format!("Ring: Ketama\nReplication: {}\nPeers:", self.replication);
        for peer in &self.peers {
            s.push_str("\n\t");
            s.push_str(peer);
        }
        s
    }
}

/// Compute a vnode's position on the ring: blake3(peer ++ vnode_index) truncated to u64.
fn vnode_position(peer: &str, vnode_index: u16) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(peer.as_bytes());
    hasher.update(&vnode_index.to_le_bytes());
    truncate(hasher.finalize())
}

/// Compute a key's position on the ring: blake3 of its byte key truncated to u64.
fn key_position(key: &BlockRef) -> u64 {
    truncate(blake3::hash(&key.to_bytes()))
}

fn truncate(hash: blake3::Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
