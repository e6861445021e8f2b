//! The [`MetadataService`] trait.

use strand_ring::RingModel;
use strand_types::{GlobalMetadata, PeerInfo};
use tokio::sync::broadcast;

use crate::error::MetaError;

/// View of the coordination service from one node.
///
/// The service is authoritative and eventually consistent: a node's cached
/// ring may lag briefly behind a cluster-wide change, but ring versions
/// published through [`set_ring`](MetadataService::set_ring) only ever
/// increase.
#[async_trait::async_trait]
pub trait MetadataService: Send + Sync {
    /// Cluster identity of the node this view belongs to.
    fn uuid(&self) -> String;

    /// The authoritative ring.
    async fn get_ring(&self) -> Result<RingModel, MetaError>;

    /// Publish a new ring. Fails with [`MetaError::VersionConflict`] unless
    /// its version is greater than the current one.
    async fn set_ring(&self, model: RingModel) -> Result<(), MetaError>;

    /// Subscribe to ring changes. Every successful `set_ring` is delivered
    /// to every live subscriber.
    fn subscribe_ring(&self) -> broadcast::Receiver<RingModel>;

    /// Cluster-wide configuration.
    async fn global_metadata(&self) -> Result<GlobalMetadata, MetaError>;

    /// Record a heartbeat for a peer, replacing its previous record.
    async fn register_peer(&self, info: PeerInfo) -> Result<(), MetaError>;

    /// Every peer that has sent a heartbeat.
    async fn get_peers(&self) -> Result<Vec<PeerInfo>, MetaError>;
}
