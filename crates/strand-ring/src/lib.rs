//! Versioned peer rings for deterministic block placement.
//!
//! A [`Ring`] maps a [`BlockRef`](strand_types::BlockRef) to an ordered
//! [`PeerPermutation`](strand_types::PeerPermutation) of cluster peers. Rings
//! are immutable once published: membership changes produce a new ring at
//! `version + 1`, leaving the old one intact for readers that still hold it.
//!
//! - [`Ketama`]: consistent hash ring with virtual nodes; a membership change
//!   only moves the keys adjacent to the peers that joined or left.
//! - [`SingleRing`]: one fixed peer, used to bootstrap a one-node cluster.
//! - [`RingRegistry`]: builds concrete rings from their transportable
//!   [`RingModel`] by type tag.
//! - [`diff`]: placement moves implied by a ring transition.

mod diff;
mod error;
mod ketama;
mod registry;
mod ring;
mod single;

pub use diff::{Migration, diff};
pub use error::RingError;
pub use ketama::{Ketama, VNODES_PER_PEER};
pub use registry::{RingConstructor, RingRegistry, default_registry};
pub use ring::{ReplicationChange, Ring, RingModel, RingModification, RingType};
pub use single::SingleRing;
