//! Construction of concrete rings by type tag.

use std::collections::HashMap;
use std::sync::LazyLock;

use strand_types::PeerList;
use tracing::warn;

use crate::error::RingError;
use crate::ketama::Ketama;
use crate::ring::{Ring, RingModel, RingType, replication_factor};
use crate::single::SingleRing;

/// Builds a ring from its transportable form.
pub type RingConstructor = fn(&RingModel) -> Result<Box<dyn Ring>, RingError>;

/// Lookup table from [`RingType`] tag to constructor.
///
/// Calling code decodes rings through the registry and never names a concrete
/// algorithm, so new algorithms only need a tag and a constructor.
#[derive(Clone, Default)]
pub struct RingRegistry {
    constructors: HashMap<RingType, RingConstructor>,
}

static DEFAULT_REGISTRY: LazyLock<RingRegistry> = LazyLock::new(RingRegistry::with_builtin);

/// Process-wide registry holding the built-in algorithms.
///
/// Initialized on first use, before any ring is decoded through it.
pub fn default_registry() -> &'static RingRegistry {
    &DEFAULT_REGISTRY
}

impl RingRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in algorithm registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(RingType::SINGLE, SingleRing::from_model);
        registry.register(RingType::KETAMA, Ketama::from_model);
        registry
    }

    /// Register a constructor for `ring_type`, replacing any previous one.
    pub fn register(&mut self, ring_type: RingType, constructor: RingConstructor) {
        if self.constructors.insert(ring_type, constructor).is_some() {
            warn!(%ring_type, "replacing registered ring constructor");
        }
    }

    /// Whether a constructor is registered for `ring_type`.
    pub fn contains(&self, ring_type: RingType) -> bool {
        self.constructors.contains_key(&ring_type)
    }

    /// Rebuild a working ring from its transportable form.
    pub fn decode(&self, model: &RingModel) -> Result<Box<dyn Ring>, RingError> {
        let ring_type = model.ring_type();
        let constructor = self
            .constructors
            .get(&ring_type)
            .ok_or(RingError::UnknownRingType(ring_type))?;
        constructor(model)
    }

    /// Decode a postcard-encoded [`RingModel`] into a working ring.
    pub fn unmarshal(&self, bytes: &[u8]) -> Result<Box<dyn Ring>, RingError> {
        self.decode(&RingModel::unmarshal(bytes)?)
    }

    /// Build a fresh ring of the given type.
    pub fn create(
        &self,
        ring_type: RingType,
        version: u32,
        replication: usize,
        peers: PeerList,
    ) -> Result<Box<dyn Ring>, RingError> {
        self.decode(&RingModel {
            ring_type: ring_type.0,
            version,
            replication_factor: replication_factor(replication)?,
            uuids: peers.into_vec(),
        })
    }
}

impl std::fmt::Debug for RingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.constructors.keys().collect();
        types.sort();
        f.debug_struct("RingRegistry")
            .field("types", &types)
            .finish()
    }
}
