//! Shared test utilities for strand-distributor tests.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use strand_meta::{MemoryMetadataService, MetaError, MetadataService};
use strand_ring::{Ring, RingModel, RingType};
use strand_store::{
    BlockStore, INodeStore, MemoryBlockStore, MemoryINodeStore, StoreError,
};
use strand_types::{BlockRef, GlobalMetadata, INodeRef, PeerInfo};
use tokio::sync::broadcast;

use crate::{
    Distributor, DistributorConfig, DistributorError, NodeServices, RebalanceContext,
    RebalanceSummary, Rebalancer, ReplicationRebalancer,
};

/// Upper bound on every eventual condition.
const WAIT: Duration = Duration::from_secs(10);

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize, seed: u32) -> Bytes {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF ^ seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    Bytes::from(data)
}

pub fn block(n: u64) -> BlockRef {
    BlockRef::data(INodeRef::new(1, n / 16), n % 16)
}

pub fn blocks(total: u64) -> Vec<BlockRef> {
    (0..total).map(block).collect()
}

pub fn ketama_model(version: u32, replication: u32, uuids: &[&str]) -> RingModel {
    RingModel {
        ring_type: RingType::KETAMA.0,
        version,
        replication_factor: replication,
        uuids: uuids.iter().map(|u| u.to_string()).collect(),
    }
}

/// Listens on an ephemeral port with fast heartbeats and short drains.
pub fn test_config() -> DistributorConfig {
    DistributorConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        heartbeat_interval_ms: 50,
        drain_timeout_ms: 2000,
        ..DistributorConfig::default()
    }
}

/// Poll `check` until it holds, panicking after [`WAIT`].
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT;
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_version(distributor: &Distributor, version: u32) {
    eventually(&format!("ring version {version}"), || async move {
        distributor.ring().version() >= version
    })
    .await;
}

// ---------------------------------------------------------------------------
// Nodes and clusters
// ---------------------------------------------------------------------------

pub struct TestNode {
    pub distributor: Distributor,
    pub blocks: Arc<MemoryBlockStore>,
    pub inodes: Arc<MemoryINodeStore>,
}

impl TestNode {
    pub fn uuid(&self) -> &str {
        self.distributor.uuid()
    }
}

/// Start a node with in-memory stores.
pub async fn start_node(
    meta: Arc<dyn MetadataService>,
    config: DistributorConfig,
    rebalancer: Arc<dyn Rebalancer>,
) -> TestNode {
    let blocks = Arc::new(MemoryBlockStore::new());
    let inodes = Arc::new(MemoryINodeStore::new());
    let distributor = Distributor::start(
        config,
        NodeServices {
            meta,
            blocks: blocks.clone(),
            inodes: inodes.clone(),
            rebalancer,
            registry: None,
        },
    )
    .await
    .unwrap();
    TestNode {
        distributor,
        blocks,
        inodes,
    }
}

pub struct TestCluster {
    pub meta: MemoryMetadataService,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Start one listening node per uuid on a shared ketama ring at version 1.
    pub async fn start(uuids: &[&str], replication: u32, config: DistributorConfig) -> Self {
        let meta =
            MemoryMetadataService::new(uuids[0], ketama_model(1, replication, uuids)).unwrap();
        let mut cluster = Self {
            meta,
            nodes: Vec::new(),
        };
        for uuid in uuids {
            cluster.join(uuid, config.clone()).await;
        }
        cluster
    }

    /// Start another node sharing the coordination service.
    pub async fn join(&mut self, uuid: &str, config: DistributorConfig) -> &TestNode {
        let node = start_node(
            Arc::new(self.meta.for_node(uuid)),
            config,
            Arc::new(ReplicationRebalancer::new()),
        )
        .await;
        self.nodes.push(node);
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn node(&self, uuid: &str) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.uuid() == uuid)
            .unwrap_or_else(|| panic!("no node {uuid}"))
    }

    pub async fn wait_for_version(&self, version: u32) {
        for node in &self.nodes {
            wait_for_version(&node.distributor, version).await;
        }
    }

    /// Whether every block is held by exactly its primaries under `ring`.
    pub async fn blocks_placed(&self, ring: &dyn Ring, keys: &[BlockRef]) -> bool {
        for key in keys {
            let perm = ring.get_peers(key).unwrap();
            for node in &self.nodes {
                let held = node.blocks.contains(*key).await.unwrap_or(false);
                if held != perm.is_primary(node.uuid()) {
                    return false;
                }
            }
        }
        true
    }

    /// Wait until every block is held by exactly its primaries under `ring`.
    pub async fn wait_for_placement(&self, ring: &dyn Ring, keys: &[BlockRef]) {
        eventually(
            &format!("blocks placed for ring v{}", ring.version()),
            || async move { self.blocks_placed(ring, keys).await },
        )
        .await;
    }

    /// Whether every inode record is held by exactly its primaries under
    /// `ring` with `replication` copies.
    pub async fn inodes_placed(
        &self,
        ring: &dyn Ring,
        inodes: &[INodeRef],
        replication: usize,
    ) -> bool {
        for inode in inodes {
            let perm = crate::inode_permutation(ring, *inode, replication).unwrap();
            for node in &self.nodes {
                let held = node.inodes.contains(*inode).await.unwrap_or(false);
                if held != perm.is_primary(node.uuid()) {
                    return false;
                }
            }
        }
        true
    }

    pub async fn close(&self) {
        for node in &self.nodes {
            node.distributor.close().await.unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Counts close calls and fails the first `failures` of them.
#[derive(Default)]
pub struct CloseCounter {
    pub calls: AtomicUsize,
    failures: AtomicUsize,
}

impl CloseCounter {
    pub fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("injected close failure".into()));
        }
        Ok(())
    }
}

/// Block store whose close goes through a [`CloseCounter`].
pub struct CountingBlockStore {
    pub inner: MemoryBlockStore,
    pub closes: CloseCounter,
}

#[async_trait::async_trait]
impl BlockStore for CountingBlockStore {
    async fn get(&self, key: BlockRef) -> Result<Option<Bytes>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: BlockRef, data: Bytes) -> Result<(), StoreError> {
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: BlockRef) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    async fn contains(&self, key: BlockRef) -> Result<bool, StoreError> {
        self.inner.contains(key).await
    }

    async fn list(&self) -> Result<Vec<BlockRef>, StoreError> {
        self.inner.list().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closes.close()?;
        self.inner.close().await
    }
}

/// Inode store whose close goes through a [`CloseCounter`].
pub struct CountingINodeStore {
    pub inner: MemoryINodeStore,
    pub closes: CloseCounter,
}

#[async_trait::async_trait]
impl INodeStore for CountingINodeStore {
    async fn get(&self, inode: INodeRef) -> Result<Option<Bytes>, StoreError> {
        self.inner.get(inode).await
    }

    async fn put(&self, inode: INodeRef, record: Bytes) -> Result<(), StoreError> {
        self.inner.put(inode, record).await
    }

    async fn delete(&self, inode: INodeRef) -> Result<(), StoreError> {
        self.inner.delete(inode).await
    }

    async fn contains(&self, inode: INodeRef) -> Result<bool, StoreError> {
        self.inner.contains(inode).await
    }

    async fn list(&self) -> Result<Vec<INodeRef>, StoreError> {
        self.inner.list().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closes.close()?;
        self.inner.close().await
    }
}

/// Coordination service whose global metadata is unreadable.
pub struct NoGlobalMetadata(pub MemoryMetadataService);

#[async_trait::async_trait]
impl MetadataService for NoGlobalMetadata {
    fn uuid(&self) -> String {
        self.0.uuid()
    }

    async fn get_ring(&self) -> Result<RingModel, MetaError> {
        self.0.get_ring().await
    }

    async fn set_ring(&self, model: RingModel) -> Result<(), MetaError> {
        self.0.set_ring(model).await
    }

    fn subscribe_ring(&self) -> broadcast::Receiver<RingModel> {
        self.0.subscribe_ring()
    }

    async fn global_metadata(&self) -> Result<GlobalMetadata, MetaError> {
        Err(MetaError::Unavailable("metadata service down".into()))
    }

    async fn register_peer(&self, info: PeerInfo) -> Result<(), MetaError> {
        self.0.register_peer(info).await
    }

    async fn get_peers(&self) -> Result<Vec<PeerInfo>, MetaError> {
        self.0.get_peers().await
    }
}

/// Coordination service whose ring broadcasts are sent by the test.
///
/// Lets a test deliver models the in-memory service would refuse to
/// publish, such as stale versions or unknown ring types.
pub struct InjectedRings {
    meta: MemoryMetadataService,
    ring_tx: broadcast::Sender<RingModel>,
}

impl InjectedRings {
    pub fn new(meta: MemoryMetadataService) -> Self {
        let (ring_tx, _) = broadcast::channel(16);
        Self { meta, ring_tx }
    }

    pub fn broadcast(&self, model: RingModel) {
        let _ = self.ring_tx.send(model);
    }
}

#[async_trait::async_trait]
impl MetadataService for InjectedRings {
    fn uuid(&self) -> String {
        self.meta.uuid()
    }

    async fn get_ring(&self) -> Result<RingModel, MetaError> {
        self.meta.get_ring().await
    }

    async fn set_ring(&self, model: RingModel) -> Result<(), MetaError> {
        self.meta.set_ring(model).await
    }

    fn subscribe_ring(&self) -> broadcast::Receiver<RingModel> {
        self.ring_tx.subscribe()
    }

    async fn global_metadata(&self) -> Result<GlobalMetadata, MetaError> {
        self.meta.global_metadata().await
    }

    async fn register_peer(&self, info: PeerInfo) -> Result<(), MetaError> {
        self.meta.register_peer(info).await
    }

    async fn get_peers(&self) -> Result<Vec<PeerInfo>, MetaError> {
        self.meta.get_peers().await
    }
}

/// One completed rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceRun {
    pub from: u32,
    pub to: u32,
    pub summary: RebalanceSummary,
}

/// Wraps a rebalancer, recording each run and how many overlapped.
pub struct RecordingRebalancer {
    inner: Arc<dyn Rebalancer>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub runs: Mutex<Vec<RebalanceRun>>,
}

impl RecordingRebalancer {
    pub fn new(inner: Arc<dyn Rebalancer>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> Vec<RebalanceRun> {
        self.runs.lock().clone()
    }
}

#[async_trait::async_trait]
impl Rebalancer for RecordingRebalancer {
    async fn rebalance(
        &self,
        ctx: &RebalanceContext,
        old: Arc<dyn Ring>,
        new: Arc<dyn Ring>,
    ) -> Result<RebalanceSummary, DistributorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (from, to) = (old.version(), new.version());
        tokio::time::sleep(self.delay).await;
        let result = self.inner.rebalance(ctx, old, new).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let summary = result?;
        self.runs.lock().push(RebalanceRun { from, to, summary });
        Ok(summary)
    }
}
