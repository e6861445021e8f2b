//! [`Distributor`]: the per-node orchestrator.
//!
//! A `Distributor` owns the local stores, the storage server, the peer
//! client and three background tasks:
//!
//! - the **heartbeat**, announcing this node to the coordination service;
//! - the **ring watcher**, swapping in new ring versions as they are
//!   published;
//! - the **rebalance worker**, running the [`Rebalancer`] for each ring
//!   transition in order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;
use strand_meta::MetadataService;
use strand_net::{PeerClient, StorageServer};
use strand_ring::{Ring, RingError, RingModel, RingRegistry, default_registry};
use strand_store::{BlockStore, INodeStore};
use strand_types::{BlockRef, INodeRef, PeerInfo, PeerPermutation};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DistributorConfig, WriteLevel};
use crate::error::DistributorError;
use crate::handler::LocalStorage;
use crate::rebalancer::{RebalanceContext, Rebalancer};

/// Inode replication used when the coordination service cannot be read.
pub const DEFAULT_INODE_REPLICATION: usize = 3;

/// The collaborators a distributor is built from.
pub struct NodeServices {
    /// Coordination service, viewed from this node.
    pub meta: Arc<dyn MetadataService>,
    /// Local block store.
    pub blocks: Arc<dyn BlockStore>,
    /// Local inode store.
    pub inodes: Arc<dyn INodeStore>,
    /// Runs after every ring change.
    pub rebalancer: Arc<dyn Rebalancer>,
    /// Ring constructors; the process-wide default when `None`.
    pub registry: Option<RingRegistry>,
}

/// Placement of an inode record.
///
/// Inode records use the ring's permutation for their placement key but
/// their own replication target, clamped to `1..=peers`.
pub fn inode_permutation(
    ring: &dyn Ring,
    inode: INodeRef,
    replication: usize,
) -> Result<PeerPermutation, RingError> {
    let mut perm = ring.get_peers(&BlockRef::for_inode(inode))?;
    perm.replication = replication.clamp(1, perm.peers.len().max(1));
    Ok(perm)
}

/// A ring swap handed to the rebalance worker.
struct Transition {
    old: Arc<dyn Ring>,
    new: Arc<dyn Ring>,
}

/// Progress of the close sequence. Each step runs at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CloseStep {
    Running,
    TasksStopped,
    ServerStopped,
    ClientClosed,
    INodesClosed,
    Closed,
}

/// Lifecycle state guarded by the close mutex.
struct Lifecycle {
    step: CloseStep,
    shutdown_tx: watch::Sender<bool>,
    server: Option<StorageServer>,
    heartbeat: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

/// A payload bound for one or more peers.
enum Record {
    Block(BlockRef, Bytes),
    INode(INodeRef, Bytes),
}

impl Record {
    fn target(&self) -> String {
        match self {
            Self::Block(key, _) => key.to_string(),
            Self::INode(inode, _) => inode.to_string(),
        }
    }
}

/// State shared with the background tasks.
struct Inner {
    uuid: String,
    config: DistributorConfig,
    meta: Arc<dyn MetadataService>,
    blocks: Arc<dyn BlockStore>,
    inodes: Arc<dyn INodeStore>,
    registry: RingRegistry,
    /// Held only to clone or replace the pointer.
    ring: RwLock<Arc<dyn Ring>>,
    client: Arc<PeerClient>,
    closed: AtomicBool,
}

/// Per-node entry point for placement, replication and rebalancing.
pub struct Distributor {
    inner: Arc<Inner>,
    local_addr: Option<SocketAddr>,
    lifecycle: Mutex<Lifecycle>,
}

impl Distributor {
    /// Start a distributor.
    ///
    /// Subscribes to ring changes and loads the current ring. When
    /// `config.listen` is set, binds the storage server and sends a first
    /// heartbeat before returning. Then starts the ring watcher and the
    /// rebalance worker.
    pub async fn start(
        config: DistributorConfig,
        node: NodeServices,
    ) -> Result<Self, DistributorError> {
        let NodeServices {
            meta,
            blocks,
            inodes,
            rebalancer,
            registry,
        } = node;
        let registry = registry.unwrap_or_else(|| default_registry().clone());
        let uuid = meta.uuid();

        // Subscribe before reading so no version published in between is missed.
        let updates = meta.subscribe_ring();
        let model = meta.get_ring().await?;
        let ring: Arc<dyn Ring> = Arc::from(registry.decode(&model)?);
        info!(%uuid, version = ring.version(), peers = ring.members().len(), "starting distributor");

        let client = Arc::new(PeerClient::new(meta.clone()));
        let inner = Arc::new(Inner {
            uuid,
            config,
            meta,
            blocks,
            inodes,
            registry,
            ring: RwLock::new(ring),
            client,
            closed: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut server = None;
        let mut heartbeat = None;
        let mut local_addr = None;
        if inner.config.listen {
            let handler = Arc::new(LocalStorage::new(
                inner.blocks.clone(),
                inner.inodes.clone(),
            ));
            let bound = StorageServer::bind(&inner.config.listen_addr, handler).await?;
            let address = bound.local_addr();
            inner.send_heartbeat(&address.to_string()).await?;
            heartbeat = Some(tokio::spawn(heartbeat_loop(
                inner.clone(),
                address.to_string(),
                shutdown_rx.clone(),
            )));
            local_addr = Some(address);
            server = Some(bound);
        }

        let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(rebalance_worker(
            inner.clone(),
            rebalancer,
            rebalance_rx,
            shutdown_rx.clone(),
        ));
        let watcher = tokio::spawn(watch_ring(
            inner.clone(),
            updates,
            rebalance_tx,
            shutdown_rx,
        ));

        Ok(Self {
            inner,
            local_addr,
            lifecycle: Mutex::new(Lifecycle {
                step: CloseStep::Running,
                shutdown_tx,
                server,
                heartbeat,
                watcher: Some(watcher),
                worker: Some(worker),
            }),
        })
    }

    /// This node's cluster identity.
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    /// Address of the storage server, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The current ring.
    pub fn ring(&self) -> Arc<dyn Ring> {
        self.inner.current_ring()
    }

    /// Whether [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Cluster-wide inode replication target.
    ///
    /// Falls back to [`DEFAULT_INODE_REPLICATION`] if the coordination
    /// service cannot be read.
    pub async fn inode_replication(&self) -> usize {
        self.inner.inode_replication().await
    }

    /// Placement of a block under the current ring.
    pub fn get_peers(&self, key: &BlockRef) -> Result<PeerPermutation, DistributorError> {
        Ok(self.ring().get_peers(key)?)
    }

    /// Placement of an inode record under the current ring.
    pub async fn get_inode_peers(
        &self,
        inode: INodeRef,
    ) -> Result<PeerPermutation, DistributorError> {
        let replication = self.inode_replication().await;
        Ok(inode_permutation(self.ring().as_ref(), inode, replication)?)
    }

    // ------------------------------------------------------------------
    // Data paths
    // ------------------------------------------------------------------

    /// Read a block from the first peer in its permutation that holds it.
    pub async fn get_block(&self, key: BlockRef) -> Result<Bytes, DistributorError> {
        self.ensure_open()?;
        let perm = self.get_peers(&key)?;

        for peer in &perm.peers {
            let found = if *peer == self.inner.uuid {
                self.inner.blocks.get(key).await.map_err(DistributorError::from)
            } else {
                self.inner
                    .client
                    .get_block(peer, key)
                    .await
                    .map_err(DistributorError::from)
            };
            match found {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => {}
                Err(e) => warn!(%key, %peer, error = %e, "block read failed, trying next peer"),
            }
        }

        Err(DistributorError::BlockNotFound(key))
    }

    /// Write a block to its primaries according to the configured write level.
    pub async fn put_block(&self, key: BlockRef, data: Bytes) -> Result<(), DistributorError> {
        self.ensure_open()?;
        let perm = self.get_peers(&key)?;
        self.inner
            .write(perm.primaries(), Record::Block(key, data))
            .await
    }

    /// Read an inode record from the first peer in its permutation that holds it.
    pub async fn get_inode(&self, inode: INodeRef) -> Result<Bytes, DistributorError> {
        self.ensure_open()?;
        let perm = self.get_inode_peers(inode).await?;

        for peer in &perm.peers {
            let found = if *peer == self.inner.uuid {
                self.inner
                    .inodes
                    .get(inode)
                    .await
                    .map_err(DistributorError::from)
            } else {
                self.inner
                    .client
                    .get_inode(peer, inode)
                    .await
                    .map_err(DistributorError::from)
            };
            match found {
                Ok(Some(record)) => return Ok(record),
                Ok(None) => {}
                Err(e) => warn!(%inode, %peer, error = %e, "inode read failed, trying next peer"),
            }
        }

        Err(DistributorError::INodeNotFound(inode))
    }

    /// Write an inode record to its primaries.
    pub async fn put_inode(&self, inode: INodeRef, record: Bytes) -> Result<(), DistributorError> {
        self.ensure_open()?;
        let perm = self.get_inode_peers(inode).await?;
        self.inner
            .write(perm.primaries(), Record::INode(inode, record))
            .await
    }

    // ------------------------------------------------------------------
    // Ring management
    // ------------------------------------------------------------------

    /// Publish `ring` through the coordination service.
    ///
    /// The local ring is swapped by the watcher once the change is
    /// broadcast, like on every other node.
    pub async fn update_ring(&self, ring: &dyn Ring) -> Result<(), DistributorError> {
        self.ensure_open()?;
        info!(version = ring.version(), peers = ring.members().len(), "publishing ring");
        self.inner.meta.set_ring(ring.to_model()?).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Shut the node down.
    ///
    /// In order: stop the background tasks, stop the storage server, close
    /// the peer client, close the inode store, close the block store. Each
    /// wait is bounded by the drain timeout. A store close error is
    /// returned immediately and the remaining steps are left undone; calling
    /// `close` again resumes at the step that failed. Once the sequence
    /// has completed, further calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), DistributorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.step == CloseStep::Closed {
            return Ok(());
        }

        self.inner.closed.store(true, Ordering::Release);
        let timeout = self.inner.config.drain_timeout();
        info!(uuid = %self.inner.uuid, step = ?lifecycle.step, "closing distributor");

        if lifecycle.step < CloseStep::TasksStopped {
            let _ = lifecycle.shutdown_tx.send(true);
            let tasks = [
                ("ring watcher", lifecycle.watcher.take()),
                ("rebalance worker", lifecycle.worker.take()),
                ("heartbeat", lifecycle.heartbeat.take()),
            ];
            for (name, task) in tasks {
                if let Some(task) = task {
                    join_bounded(name, task, timeout).await;
                }
            }
            lifecycle.step = CloseStep::TasksStopped;
        }

        if lifecycle.step < CloseStep::ServerStopped {
            if let Some(server) = lifecycle.server.take() {
                server.shutdown(timeout).await;
            }
            lifecycle.step = CloseStep::ServerStopped;
        }

        if lifecycle.step < CloseStep::ClientClosed {
            self.inner.client.close().await;
            lifecycle.step = CloseStep::ClientClosed;
        }

        if lifecycle.step < CloseStep::INodesClosed {
            self.inner.inodes.close().await.inspect_err(|e| {
                error!(error = %e, "failed to close inode store");
            })?;
            lifecycle.step = CloseStep::INodesClosed;
        }

        self.inner.blocks.close().await.inspect_err(|e| {
            error!(error = %e, "failed to close block store");
        })?;
        lifecycle.step = CloseStep::Closed;

        info!(uuid = %self.inner.uuid, "distributor closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DistributorError> {
        if self.is_closed() {
            return Err(DistributorError::Closed);
        }
        Ok(())
    }
}

impl Drop for Distributor {
    fn drop(&mut self) {
        // Stops the background tasks of a distributor that was never closed.
        let _ = self.lifecycle.get_mut().shutdown_tx.send(true);
    }
}

impl Inner {
    fn current_ring(&self) -> Arc<dyn Ring> {
        self.ring.read().clone()
    }

    async fn inode_replication(&self) -> usize {
        match self.meta.global_metadata().await {
            Ok(global) => global.inode_replication,
            Err(e) => {
                warn!(
                    error = %e,
                    default = DEFAULT_INODE_REPLICATION,
                    "failed to read global metadata, using default inode replication"
                );
                DEFAULT_INODE_REPLICATION
            }
        }
    }

    /// Decode `model` and swap it in if newer. Returns the transition.
    fn swap_ring(&self, model: &RingModel) -> Result<Option<Transition>, RingError> {
        let new: Arc<dyn Ring> = Arc::from(self.registry.decode(model)?);

        let old = {
            let mut current = self.ring.write();
            if new.version() <= current.version() {
                debug!(
                    current = current.version(),
                    received = new.version(),
                    "ignoring ring that is not newer"
                );
                return Ok(None);
            }
            std::mem::replace(&mut *current, new.clone())
        };

        info!(
            from = old.version(),
            to = new.version(),
            peers = new.members().len(),
            "ring swapped"
        );
        Ok(Some(Transition { old, new }))
    }

    /// Write `record` to `targets` and check the configured write level.
    async fn write(&self, targets: &[String], record: Record) -> Result<(), DistributorError> {
        let level = self.config.write_level;

        if level == WriteLevel::Local {
            self.store_local(&record).await?;
            return Ok(());
        }

        let mut succeeded = 0;
        for peer in targets {
            let result = if *peer == self.uuid {
                self.store_local(&record).await
            } else {
                self.send_remote(peer, &record).await
            };
            match result {
                Ok(()) => succeeded += 1,
                Err(e) => warn!(item = %record.target(), %peer, error = %e, "replica write failed"),
            }
        }

        let needed = match level {
            WriteLevel::All => targets.len(),
            WriteLevel::One | WriteLevel::Local => 1,
        };
        if succeeded < needed {
            return Err(DistributorError::WriteFailed {
                target: record.target(),
                needed,
                succeeded,
            });
        }
        debug!(item = %record.target(), copies = succeeded, "write complete");
        Ok(())
    }

    async fn store_local(&self, record: &Record) -> Result<(), DistributorError> {
        match record {
            Record::Block(key, data) => self.blocks.put(*key, data.clone()).await?,
            Record::INode(inode, bytes) => self.inodes.put(*inode, bytes.clone()).await?,
        }
        Ok(())
    }

    async fn send_remote(&self, peer: &str, record: &Record) -> Result<(), DistributorError> {
        match record {
            Record::Block(key, data) => self.client.put_block(peer, *key, data.clone()).await?,
            Record::INode(inode, bytes) => {
                self.client.put_inode(peer, *inode, bytes.clone()).await?
            }
        }
        Ok(())
    }

    async fn send_heartbeat(&self, address: &str) -> Result<(), DistributorError> {
        let total_blocks = self.blocks.list().await.map_or(0, |keys| keys.len()) as u64;
        let total_inodes = self.inodes.list().await.map_or(0, |keys| keys.len()) as u64;
        let last_seen = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        self.meta
            .register_peer(PeerInfo {
                uuid: self.uuid.clone(),
                address: address.to_string(),
                last_seen,
                total_blocks,
                total_inodes,
            })
            .await?;
        Ok(())
    }

    async fn rebalance_context(&self) -> RebalanceContext {
        RebalanceContext {
            uuid: self.uuid.clone(),
            blocks: self.blocks.clone(),
            inodes: self.inodes.clone(),
            client: self.client.clone(),
            inode_replication: self.inode_replication().await,
        }
    }
}

// ----------------------------------------------------------------------
// Background tasks
// ----------------------------------------------------------------------

async fn heartbeat_loop(inner: Arc<Inner>, address: String, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(inner.config.heartbeat_interval());
    // The first tick fires immediately; start() already sent that heartbeat.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = inner.send_heartbeat(&address).await {
                    warn!(error = %e, "heartbeat failed");
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!("heartbeat stopped");
}

async fn watch_ring(
    inner: Arc<Inner>,
    mut updates: broadcast::Receiver<RingModel>,
    rebalance_tx: mpsc::UnboundedSender<Transition>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("ring watcher started");

    loop {
        let model = tokio::select! {
            _ = shutdown_rx.changed() => break,
            update = updates.recv() => match update {
                Ok(model) => model,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ring watcher lagged, resyncing from coordination service");
                    match inner.meta.get_ring().await {
                        Ok(model) => model,
                        Err(e) => {
                            warn!(error = %e, "failed to resync ring");
                            continue;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("ring subscription closed");
                    break;
                }
            },
        };

        match inner.swap_ring(&model) {
            Ok(Some(transition)) => {
                if rebalance_tx.send(transition).is_err() {
                    info!("rebalance channel closed");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => error!(version = model.version, error = %e, "failed to decode published ring"),
        }
    }

    info!("ring watcher stopped");
}

async fn rebalance_worker(
    inner: Arc<Inner>,
    rebalancer: Arc<dyn Rebalancer>,
    mut transitions: mpsc::UnboundedReceiver<Transition>,
    shutdown_rx: watch::Receiver<bool>,
) {
    while let Some(Transition { old, new }) = transitions.recv().await {
        let (from, to) = (old.version(), new.version());
        if *shutdown_rx.borrow() {
            debug!(from, to, "skipping rebalance during shutdown");
            continue;
        }

        let ctx = inner.rebalance_context().await;
        match rebalancer.rebalance(&ctx, old, new).await {
            Ok(summary) => info!(
                from,
                to,
                scanned = summary.scanned,
                pushed = summary.pushed,
                dropped = summary.dropped,
                failed = summary.failed,
                "rebalance complete"
            ),
            Err(e) => error!(from, to, error = %e, "rebalance failed"),
        }
    }
    debug!("rebalance worker stopped");
}

/// Wait for `task` up to `timeout`, aborting it if it does not finish.
async fn join_bounded(name: &str, mut task: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => debug!(task = name, "background task stopped"),
        Ok(Err(e)) => warn!(task = name, error = %e, "background task failed"),
        Err(_) => {
            warn!(task = name, ?timeout, "background task did not stop in time, aborting");
            task.abort();
        }
    }
}
