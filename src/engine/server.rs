//! Multi-connection server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::connection::{Connection, ConnectionState};
use crate::draft::Draft;
use crate::engine::WebSocket;
use crate::engine::buffers::BufferPool;
use crate::engine::handler::WebSocketHandler;
use crate::engine::socket::write_loop;
use crate::engine::workers::{Job, WorkerPool};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};

/// Jobs each worker may have queued before read tasks wait.
const WORKER_QUEUE_DEPTH: usize = 64;

struct Inner {
    config: Config,
    drafts: Vec<Draft>,
    handler: Arc<dyn WebSocketHandler>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    connections: Mutex<HashMap<u64, WebSocket>>,
    next_id: AtomicU64,
    stop: watch::Sender<bool>,
    workers: WorkerPool,
    buffers: BufferPool,
}

/// A WebSocket server.
///
/// [`run`](Self::run) accepts connections until [`stop`](Self::stop). Every
/// connection gets a read task and a write task; its bytes are decoded on
/// the decode worker it was assigned at accept time.
///
/// # Example
///
/// ```rust,ignore
/// let server = WebSocketServer::bind("127.0.0.1:9000", Arc::new(Echo), Config::default()).await?;
/// let runner = server.clone();
/// tokio::spawn(async move { runner.run().await });
/// // ...
/// server.stop(Duration::from_secs(1)).await;
/// ```
#[derive(Clone)]
pub struct WebSocketServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("local_addr", &self.inner.local_addr)
            .field("connections", &self.inner.connections.lock().len())
            .finish()
    }
}

impl WebSocketServer {
    /// Bind a server accepting every known draft.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the address cannot be bound or workers cannot start.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        handler: Arc<impl WebSocketHandler>,
        config: Config,
    ) -> Result<Self> {
        Self::bind_with_drafts(addr, handler, config, Draft::all()).await
    }

    /// Bind a server accepting `drafts`, tried in order.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the address cannot be bound or workers cannot start.
    pub async fn bind_with_drafts(
        addr: impl ToSocketAddrs,
        handler: Arc<impl WebSocketHandler>,
        config: Config,
        drafts: Vec<Draft>,
    ) -> Result<Self> {
        if drafts.is_empty() {
            return Err(Error::Internal("server needs at least one draft".into()));
        }
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let workers = WorkerPool::new(config.workers(), WORKER_QUEUE_DEPTH)?;
        let buffers = BufferPool::new(config.buffers(), config.read_buffer_size);
        let (stop, _) = watch::channel(false);
        debug!(%local_addr, workers = workers.len(), "Server bound");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                drafts,
                handler,
                listener: Mutex::new(Some(listener)),
                local_addr,
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stop,
                workers,
                buffers,
            }),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Every connection currently registered, in no particular order.
    #[must_use]
    pub fn connections(&self) -> Vec<WebSocket> {
        self.inner.connections.lock().values().cloned().collect()
    }

    /// Send `message` to every open connection; returns how many accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.connections()
            .iter()
            .filter(|ws| ws.is_open())
            .filter(|ws| match ws.send(message.clone()) {
                Ok(()) => true,
                Err(e) => {
                    trace!(id = ws.id(), error = %e, "Broadcast skipped connection");
                    false
                }
            })
            .count()
    }

    /// Accept connections until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// `Error::Internal` if the server is already running or was stopped.
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .inner
            .listener
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("server is already running".into()))?;
        let mut stop = self.inner.stop.subscribe();
        let stopped = *stop.borrow();
        if stopped {
            return Ok(());
        }

        let timeouts = &self.inner.config.timeouts;
        if let (Some(interval), Some(deadline)) =
            (timeouts.connection_lost, timeouts.pong_deadline())
        {
            tokio::spawn(watch_connections(Arc::clone(&self.inner), interval, deadline));
        }

        debug!(local_addr = %self.inner.local_addr, "Accepting connections");
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => self.accept(stream, remote),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
        debug!(local_addr = %self.inner.local_addr, "Server stopped accepting");
        Ok(())
    }

    /// Stop accepting and close every connection with 1001, waiting up to
    /// `grace` for them to finish.
    pub async fn stop(&self, grace: Duration) {
        self.inner.stop.send_replace(true);
        let connections = self.connections();
        debug!(connections = connections.len(), "Stopping server");
        for ws in &connections {
            ws.close(CloseCode::GoingAway, "server shutting down");
        }
        let all_closed = async {
            for ws in &connections {
                ws.closed().await;
            }
        };
        if tokio::time::timeout(grace, all_closed).await.is_err() {
            warn!("Connections still open after stop grace period");
        }
    }

    fn accept(&self, stream: TcpStream, remote: SocketAddr) {
        let inner = &self.inner;
        if let Err(e) = stream.set_nodelay(inner.config.tcp_nodelay) {
            trace!(%remote, error = %e, "Could not set TCP_NODELAY");
        }
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Connection::server(inner.config.clone(), &inner.drafts)
            .with_addrs(Some(inner.local_addr), Some(remote));
        let ws = WebSocket::new(id, conn, Arc::clone(&inner.handler));
        inner.connections.lock().insert(id, ws.clone());
        debug!(id, %remote, "Accepted connection");

        let (reader, writer) = stream.into_split();
        tokio::spawn(write_loop(ws.clone(), writer, inner.config.max_write_batch));
        tokio::spawn(read_loop(Arc::clone(inner), ws, reader, inner.workers.assign()));
    }
}

/// Wait for readable bytes, borrow a pooled buffer, hand it to the worker.
async fn read_loop(
    inner: Arc<Inner>,
    ws: WebSocket,
    reader: OwnedReadHalf,
    worker: mpsc::Sender<Job>,
) {
    let mut closed = ws.closed_receiver();
    let handshake = tokio::time::sleep(inner.config.timeouts.handshake);
    tokio::pin!(handshake);
    let mut handshake_pending = true;

    loop {
        let finished = *closed.borrow_and_update();
        if finished {
            break;
        }
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            () = &mut handshake, if handshake_pending => {
                handshake_pending = false;
                ws.handshake_timed_out();
                continue;
            }
            ready = reader.readable() => {
                if let Err(e) = ready {
                    report_transport_error(&worker, &ws, e.into()).await;
                    break;
                }
            }
        }
        if handshake_pending && ws.ready_state() != ConnectionState::Connecting {
            handshake_pending = false;
        }

        let mut buf = match inner.buffers.acquire().await {
            Ok(buf) => buf,
            Err(e) => {
                tracing::error!(id = ws.id(), error = %e, "No read buffer");
                break;
            }
        };
        match reader.try_read_buf(&mut *buf) {
            Ok(0) => break,
            Ok(n) => {
                trace!(id = ws.id(), n, "read");
                if worker.send(Job::Data(ws.clone(), buf)).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                report_transport_error(&worker, &ws, e.into()).await;
                break;
            }
        }
    }

    if worker.send(Job::Eot(ws.clone())).await.is_err() {
        ws.eot();
    }
    ws.closed().await;
    inner.connections.lock().remove(&ws.id());
    debug!(id = ws.id(), "Connection removed");
}

/// Hand a read failure to the connection's worker, or apply it inline if
/// the worker is gone.
async fn report_transport_error(worker: &mpsc::Sender<Job>, ws: &WebSocket, error: Error) {
    if let Err(mpsc::error::SendError(job)) = worker.send(Job::Error(ws.clone(), error)).await {
        warn!(id = ws.id(), "Decode worker gone; applying transport error inline");
        if let Job::Error(ws, error) = job {
            ws.transport_error(error);
        }
    }
}

/// Ping every open connection each `interval`; drop the silent ones.
async fn watch_connections(inner: Arc<Inner>, interval: Duration, deadline: Duration) {
    let mut stop = inner.stop.subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let now = Instant::now();
                let connections: Vec<WebSocket> =
                    inner.connections.lock().values().cloned().collect();
                trace!(connections = connections.len(), "Lost-connection check");
                for ws in connections {
                    ws.check_alive(now, deadline);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::socket::tests::Log;

    #[tokio::test]
    async fn test_read_error_applied_when_worker_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let log = Log::new();
        let ws = WebSocket::new(
            7,
            Connection::server(Config::default(), &Draft::all()),
            Arc::clone(&log) as Arc<dyn WebSocketHandler>,
        );

        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        report_transport_error(&tx, &ws, reset.into()).await;

        assert!(ws.is_closed());
        assert_eq!(ws.ready_state(), ConnectionState::NeverConnected);
        assert_eq!(log.entries(), vec!["error", "close NeverConnected"]);
    }
}
