//! Pooled client for talking to peers.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use strand_meta::MetadataService;
use strand_types::{BlockRef, INodeRef};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec::{read_message, write_message};
use crate::error::NetError;
use crate::message::StorageMessage;

/// Bound on opening a connection to a peer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One pooled connection.
struct Connection {
    stream: Mutex<TcpStream>,
    /// Set when an exchange stopped between request and response. The
    /// stream may still carry that response, so it is never reused.
    broken: AtomicBool,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            broken: AtomicBool::new(false),
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

/// Marks its connection broken when dropped before [`finish`](Self::finish).
struct InFlight<'a> {
    conn: &'a Connection,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn start(conn: &'a Connection) -> Self {
        Self {
            conn,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.broken.store(true, Ordering::Release);
        }
    }
}

/// Client side of the storage protocol.
///
/// Peers are addressed by uuid; addresses come from the heartbeats recorded
/// in the coordination service. One connection per peer is kept open and
/// reused. A connection that fails mid-request, or whose request was
/// cancelled before the response arrived, is dropped from the pool and the
/// error is returned to the caller without retrying.
pub struct PeerClient {
    meta: Arc<dyn MetadataService>,
    /// Never held across a connect.
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl PeerClient {
    /// Create a client resolving peers through `meta`.
    pub fn new(meta: Arc<dyn MetadataService>) -> Self {
        Self::with_connect_timeout(meta, CONNECT_TIMEOUT)
    }

    /// Like [`new`](Self::new) with a custom bound on opening connections.
    pub fn with_connect_timeout(meta: Arc<dyn MetadataService>, connect_timeout: Duration) -> Self {
        Self {
            meta,
            connections: Mutex::new(HashMap::new()),
            connect_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Read a block from `peer`'s local store.
    pub async fn get_block(&self, peer: &str, key: BlockRef) -> Result<Option<Bytes>, NetError> {
        match self.call(peer, StorageMessage::GetBlock { key }).await? {
            StorageMessage::Block { key: echoed, data } if echoed == key => Ok(data),
            StorageMessage::Block { key: echoed, .. } => Err(NetError::UnexpectedResponse(
                format!("asked for block {key}, got {echoed}"),
            )),
            other => Err(unexpected("Block", &other)),
        }
    }

    /// Write a block to `peer`'s local store.
    pub async fn put_block(&self, peer: &str, key: BlockRef, data: Bytes) -> Result<(), NetError> {
        let size = data.len();
        match self.call(peer, StorageMessage::PutBlock { key, data }).await? {
            StorageMessage::Ack => {
                debug!(%peer, %key, size, "pushed block to peer");
                Ok(())
            }
            other => Err(unexpected("Ack", &other)),
        }
    }

    /// Read an inode record from `peer`.
    pub async fn get_inode(&self, peer: &str, inode: INodeRef) -> Result<Option<Bytes>, NetError> {
        match self.call(peer, StorageMessage::GetINode { inode }).await? {
            StorageMessage::INode {
                inode: echoed,
                record,
            } if echoed == inode => Ok(record),
            StorageMessage::INode { inode: echoed, .. } => Err(NetError::UnexpectedResponse(
                format!("asked for inode {inode}, got {echoed}"),
            )),
            other => Err(unexpected("INode", &other)),
        }
    }

    /// Write an inode record to `peer`.
    pub async fn put_inode(
        &self,
        peer: &str,
        inode: INodeRef,
        record: Bytes,
    ) -> Result<(), NetError> {
        match self.call(peer, StorageMessage::PutINode { inode, record }).await? {
            StorageMessage::Ack => Ok(()),
            other => Err(unexpected("Ack", &other)),
        }
    }

    /// Round-trip a ping to `peer`, returning the elapsed time.
    pub async fn ping(&self, peer: &str) -> Result<Duration, NetError> {
        let started = SystemTime::now();
        let timestamp = started
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        match self.call(peer, StorageMessage::Ping { timestamp }).await? {
            StorageMessage::Pong { timestamp: echoed } if echoed == timestamp => {
                Ok(started.elapsed().unwrap_or_default())
            }
            other => Err(unexpected("Pong", &other)),
        }
    }

    /// Drop every pooled connection and refuse further calls.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut connections = self.connections.lock().await;
            let n = connections.len();
            connections.clear();
            n
        };
        debug!(connections = dropped, "peer client closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------
    // Request/response plumbing
    // -------------------------------------------------------------------

    async fn call(&self, peer: &str, request: StorageMessage) -> Result<StorageMessage, NetError> {
        loop {
            let conn = self.connection(peer).await?;

            let result = {
                let mut stream = conn.stream.lock().await;
                // A caller before us may have been cancelled mid-exchange.
                if conn.is_broken() {
                    None
                } else {
                    let in_flight = InFlight::start(&conn);
                    let result = exchange(&mut stream, &request).await;
                    if result.is_ok() {
                        in_flight.finish();
                    }
                    Some(result)
                }
            };

            match result {
                None => {
                    debug!(%peer, "discarding interrupted peer connection");
                    self.evict(peer, &conn).await;
                }
                Some(Ok(StorageMessage::Error { message })) => return Err(NetError::Remote(message)),
                Some(Ok(response)) => return Ok(response),
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "dropping failed peer connection");
                    self.evict(peer, &conn).await;
                    return Err(e);
                }
            }
        }
    }

    /// The pooled connection to `peer`, opening one if needed.
    async fn connection(&self, peer: &str) -> Result<Arc<Connection>, NetError> {
        if let Some(conn) = self.pooled(peer).await? {
            return Ok(conn);
        }

        let address = self.resolve(peer).await?;
        debug!(%peer, %address, "connecting to peer");
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| NetError::ConnectTimeout {
                peer: peer.to_string(),
                timeout: self.connect_timeout,
            })??;
        stream.set_nodelay(true)?;

        let mut connections = self.connections.lock().await;
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        // Another caller may have connected while we did.
        if let Some(conn) = connections.get(peer).filter(|conn| !conn.is_broken()) {
            return Ok(conn.clone());
        }
        let conn = Arc::new(Connection::new(stream));
        connections.insert(peer.to_string(), conn.clone());
        Ok(conn)
    }

    async fn pooled(&self, peer: &str) -> Result<Option<Arc<Connection>>, NetError> {
        let connections = self.connections.lock().await;
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        Ok(connections
            .get(peer)
            .filter(|conn| !conn.is_broken())
            .cloned())
    }

    async fn resolve(&self, peer: &str) -> Result<String, NetError> {
        self.meta
            .get_peers()
            .await?
            .into_iter()
            .find(|info| info.uuid == peer)
            .map(|info| info.address)
            .ok_or_else(|| NetError::UnknownPeer(peer.to_string()))
    }

    /// Remove `conn` from the pool unless it was already replaced.
    async fn evict(&self, peer: &str, conn: &Arc<Connection>) {
        let mut connections = self.connections.lock().await;
        if connections
            .get(peer)
            .is_some_and(|pooled| Arc::ptr_eq(pooled, conn))
        {
            connections.remove(peer);
        }
    }
}

async fn exchange(stream: &mut TcpStream, request: &StorageMessage) -> Result<StorageMessage, NetError> {
    write_message(stream, request).await?;
    read_message(stream).await?.ok_or_else(|| {
        NetError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed the connection",
        ))
    })
}

fn unexpected(expected: &str, got: &StorageMessage) -> NetError {
    NetError::UnexpectedResponse(format!("expected {expected}, got {}", got.kind()))
}
