//! In-process coordination service.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_ring::{RingModel, RingRegistry, default_registry};
use strand_types::{GlobalMetadata, PeerInfo};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::MetaError;
use crate::service::MetadataService;

/// Capacity of the ring change broadcast channel.
const RING_CHANNEL_CAPACITY: usize = 64;

struct Shared {
    /// Decodes every ring before it is accepted.
    registry: RingRegistry,
    ring: Mutex<RingModel>,
    global: Mutex<GlobalMetadata>,
    peers: Mutex<BTreeMap<String, PeerInfo>>,
    ring_tx: broadcast::Sender<RingModel>,
}

/// Coordination service held in memory.
///
/// Cloning via [`for_node`](Self::for_node) yields another node's view of
/// the same state, so a whole test cluster can share one instance.
#[derive(Clone)]
pub struct MemoryMetadataService {
    uuid: String,
    shared: Arc<Shared>,
}

impl MemoryMetadataService {
    /// Create a service seeded with `ring`, viewed from node `uuid`.
    ///
    /// Rings are validated against the built-in ring types.
    pub fn new(uuid: impl Into<String>, ring: RingModel) -> Result<Self, MetaError> {
        Self::with_registry(uuid, ring, default_registry().clone())
    }

    /// Like [`new`](Self::new), validating rings against `registry`.
    pub fn with_registry(
        uuid: impl Into<String>,
        ring: RingModel,
        registry: RingRegistry,
    ) -> Result<Self, MetaError> {
        registry.decode(&ring)?;
        let (ring_tx, _) = broadcast::channel(RING_CHANNEL_CAPACITY);
        Ok(Self {
            uuid: uuid.into(),
            shared: Arc::new(Shared {
                registry,
                ring: Mutex::new(ring),
                global: Mutex::new(GlobalMetadata::default()),
                peers: Mutex::new(BTreeMap::new()),
                ring_tx,
            }),
        })
    }

    /// The same service viewed from another node.
    pub fn for_node(&self, uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Replace the cluster-wide configuration.
    pub fn set_global_metadata(&self, global: GlobalMetadata) {
        *self.shared.global.lock() = global;
    }
}

#[async_trait::async_trait]
impl MetadataService for MemoryMetadataService {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    async fn get_ring(&self) -> Result<RingModel, MetaError> {
        Ok(self.shared.ring.lock().clone())
    }

    async fn set_ring(&self, model: RingModel) -> Result<(), MetaError> {
        self.shared.registry.decode(&model)?;
        {
            let mut current = self.shared.ring.lock();
            if model.version <= current.version {
                return Err(MetaError::VersionConflict {
                    current: current.version,
                    proposed: model.version,
                });
            }
            *current = model.clone();
            // Sent under the lock so subscribers see versions in order.
            let receivers = self.shared.ring_tx.send(model.clone()).unwrap_or(0);
            debug!(receivers, "broadcast ring change");
        }
        info!(version = model.version, peers = model.uuids.len(), "published ring");
        Ok(())
    }

    fn subscribe_ring(&self) -> broadcast::Receiver<RingModel> {
        self.shared.ring_tx.subscribe()
    }

    async fn global_metadata(&self) -> Result<GlobalMetadata, MetaError> {
        Ok(*self.shared.global.lock())
    }

    async fn register_peer(&self, info: PeerInfo) -> Result<(), MetaError> {
        debug!(uuid = %info.uuid, address = %info.address, "peer heartbeat");
        self.shared.peers.lock().insert(info.uuid.clone(), info);
        Ok(())
    }

    async fn get_peers(&self) -> Result<Vec<PeerInfo>, MetaError> {
        Ok(self.shared.peers.lock().values().cloned().collect())
    }
}
