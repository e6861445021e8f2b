//! TCP storage server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use strand_types::{BlockRef, INodeRef};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::codec::{read_message, write_message};
use crate::error::NetError;
use crate::message::StorageMessage;

/// Error type returned by [`StorageHandler`] methods.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Local side of the storage protocol.
///
/// The server dispatches every decoded request to these methods and sends
/// the result back as a [`StorageMessage`] response. Errors are reported to
/// the remote caller as [`StorageMessage::Error`].
#[async_trait::async_trait]
pub trait StorageHandler: Send + Sync + 'static {
    /// Read a locally held block.
    async fn get_block(&self, key: BlockRef) -> Result<Option<Bytes>, HandlerError>;

    /// Write a block locally.
    async fn put_block(&self, key: BlockRef, data: Bytes) -> Result<(), HandlerError>;

    /// Read a locally held inode record.
    async fn get_inode(&self, inode: INodeRef) -> Result<Option<Bytes>, HandlerError>;

    /// Write an inode record locally.
    async fn put_inode(&self, inode: INodeRef, record: Bytes) -> Result<(), HandlerError>;
}

/// Accepts storage connections and serves them from a [`StorageHandler`].
///
/// Each connection runs in its own task and handles requests one at a time.
/// [`shutdown`](Self::shutdown) stops accepting, lets in-flight requests
/// finish and waits a bounded time for every connection to wind down.
pub struct StorageServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl StorageServer {
    /// Bind `addr` and start serving.
    pub async fn bind(addr: &str, handler: Arc<dyn StorageHandler>) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(listener, handler, shutdown_rx));
        info!(%local_addr, "storage server listening");

        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop is still running.
    pub fn is_running(&self) -> bool {
        self.accept_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting and wait up to `timeout` for open connections to
    /// finish their current request. Connections still open after the
    /// timeout are aborted. Calling this again does nothing.
    pub async fn shutdown(&self, timeout: Duration) {
        let Some(mut task) = self.accept_task.lock().take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);

        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            warn!(addr = %self.local_addr, ?timeout, "storage server drain timed out, aborting");
            task.abort();
        }
        info!(addr = %self.local_addr, "storage server stopped");
    }
}

impl Drop for StorageServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn StorageHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    debug!(%peer, "accepted storage connection");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        handler.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "failed to accept storage connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn StorageHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let request = tokio::select! {
            read = read_message(&mut reader) => read,
            _ = shutdown_rx.changed() => break,
        };

        let request = match request {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(%peer, "storage connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "failed to read storage request");
                break;
            }
        };

        let response = dispatch(handler.as_ref(), request).await;
        if let Err(e) = write_message(&mut writer, &response).await {
            warn!(%peer, error = %e, "failed to write storage response");
            break;
        }
    }
}

async fn dispatch(handler: &dyn StorageHandler, request: StorageMessage) -> StorageMessage {
    let kind = request.kind();
    let result = match request {
        StorageMessage::GetBlock { key } => handler
            .get_block(key)
            .await
            .map(|data| StorageMessage::Block { key, data }),
        StorageMessage::PutBlock { key, data } => handler
            .put_block(key, data)
            .await
            .map(|()| StorageMessage::Ack),
        StorageMessage::GetINode { inode } => handler
            .get_inode(inode)
            .await
            .map(|record| StorageMessage::INode { inode, record }),
        StorageMessage::PutINode { inode, record } => handler
            .put_inode(inode, record)
            .await
            .map(|()| StorageMessage::Ack),
        StorageMessage::Ping { timestamp } => Ok(StorageMessage::Pong { timestamp }),
        other => Err(format!("{} is not a request", other.kind()).into()),
    };

    result.unwrap_or_else(|e| {
        debug!(kind, error = %e, "storage request failed");
        StorageMessage::Error {
            message: e.to_string(),
        }
    })
}
