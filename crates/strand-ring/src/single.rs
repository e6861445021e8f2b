//! Ring of exactly one peer.

use strand_types::{BlockRef, PeerList, PeerPermutation};
use tracing::debug;

use crate::error::RingError;
use crate::ring::{Ring, RingModel, RingModification, RingType};

/// A ring holding a single fixed peer.
///
/// Every key maps to that peer with replication 1. Used to bootstrap a
/// one-node cluster before a real placement ring is published; membership
/// cannot change without switching algorithms.
#[derive(Debug, Clone)]
pub struct SingleRing {
    version: u32,
    peer: String,
}

impl SingleRing {
    /// Create a single-peer ring.
    pub fn new(version: u32, peer: impl Into<String>) -> Self {
        Self {
            version,
            peer: peer.into(),
        }
    }

    /// Registry constructor.
    pub fn from_model(model: &RingModel) -> Result<Box<dyn Ring>, RingError> {
        match model.uuids.as_slice() {
            [peer] => Ok(Box::new(Self::new(model.version, peer.clone()))),
            other => Err(RingError::InvalidModel(format!(
                "single ring needs exactly one peer, got {}",
                other.len()
            ))),
        }
    }
}

impl Ring for SingleRing {
    fn ring_type(&self) -> RingType {
        RingType::SINGLE
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn replication(&self) -> usize {
        1
    }

    fn members(&self) -> PeerList {
        PeerList::new([self.peer.clone()])
    }

    fn get_peers(&self, _key: &BlockRef) -> Result<PeerPermutation, RingError> {
        Ok(PeerPermutation {
            peers: vec![self.peer.clone()],
            replication: 1,
        })
    }

    fn add_peers(
        &self,
        _peers: &PeerList,
        _mods: &[&dyn RingModification],
    ) -> Result<Box<dyn Ring>, RingError> {
        Err(RingError::Unsupported {
            ring_type: RingType::SINGLE,
            operation: "add_peers",
        })
    }

    fn remove_peers(
        &self,
        _peers: &PeerList,
        _mods: &[&dyn RingModification],
    ) -> Result<Box<dyn Ring>, RingError> {
        Err(RingError::Unsupported {
            ring_type: RingType::SINGLE,
            operation: "remove_peers",
        })
    }

    fn change_replication(&mut self, replication: usize) {
        debug!(replication, "single ring ignores replication changes");
    }

    fn describe(&self) -> String {
        format!("Ring: Single\nReplication: 1\nPeers:\n\t{}", self.peer)
    }
}
