//! Single-connection client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::Config;
use crate::connection::{Connection, ConnectionState};
use crate::draft::Draft;
use crate::engine::WebSocket;
use crate::engine::handler::WebSocketHandler;
use crate::engine::socket::write_loop;
use crate::error::Result;
use crate::message::CloseCode;
use crate::protocol::handshake::ClientHandshake;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// A WebSocket client with its own read and write tasks.
///
/// # Example
///
/// ```rust,ignore
/// let mut request = ClientHandshake::new("/chat");
/// request.headers.set("Host", "localhost:9000");
/// let client = WebSocketClient::connect(
///     "127.0.0.1:9000", &Draft::rfc6455(), request, Arc::new(Printer), Config::default(),
/// ).await?;
/// client.websocket().send_text("hello")?;
/// client.close();
/// client.closed().await;
/// ```
#[derive(Debug)]
pub struct WebSocketClient {
    ws: WebSocket,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketClient {
    /// Open a TCP connection to `addr` and start the handshake.
    ///
    /// Returns once the request is queued; `on_open` reports success.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the TCP connection fails, or a handshake error from the
    /// draft.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        draft: &Draft,
        request: ClientHandshake,
        handler: Arc<impl WebSocketHandler>,
        config: Config,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        if let Err(e) = stream.set_nodelay(config.tcp_nodelay) {
            trace!(error = %e, "Could not set TCP_NODELAY");
        }
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        debug!(?remote, draft = draft.name(), "Connected");
        let conn = Connection::client(config.clone(), draft).with_addrs(local, remote);
        Self::start(stream, conn, request, handler, config)
    }

    /// Run the client over an already established stream.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// A handshake error from the draft.
    pub fn with_stream<S>(
        stream: S,
        draft: &Draft,
        request: ClientHandshake,
        handler: Arc<impl WebSocketHandler>,
        config: Config,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Connection::client(config.clone(), draft);
        Self::start(stream, conn, request, handler, config)
    }

    fn start<S>(
        stream: S,
        conn: Connection,
        request: ClientHandshake,
        handler: Arc<impl WebSocketHandler>,
        config: Config,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let ws = WebSocket::new(id, conn, handler);
        ws.with_conn(|c| c.start_handshake(request))?;

        let (reader, writer) = tokio::io::split(stream);
        let mut tasks = vec![
            tokio::spawn(write_loop(ws.clone(), writer, config.max_write_batch)),
            tokio::spawn(read_loop(
                ws.clone(),
                reader,
                config.read_buffer_size,
                config.timeouts.handshake,
            )),
        ];
        if let (Some(interval), Some(deadline)) = (
            config.timeouts.connection_lost,
            config.timeouts.pong_deadline(),
        ) {
            tasks.push(tokio::spawn(watch_connection(ws.clone(), interval, deadline)));
        }
        Ok(Self { ws, tasks })
    }

    /// Handle for sending on this connection.
    #[must_use]
    pub fn websocket(&self) -> &WebSocket {
        &self.ws
    }

    /// Start a normal close.
    pub fn close(&self) {
        self.ws.close(CloseCode::Normal, "");
    }

    /// Wait until the connection is finished.
    pub async fn closed(&self) {
        self.ws.closed().await;
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn read_loop<R>(ws: WebSocket, mut reader: R, buffer_size: usize, handshake_timeout: Duration)
where
    R: AsyncRead + Unpin,
{
    let mut closed = ws.closed_receiver();
    let handshake = tokio::time::sleep(handshake_timeout);
    tokio::pin!(handshake);
    let mut handshake_pending = true;
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        let finished = *closed.borrow_and_update();
        if finished {
            break;
        }
        buf.clear();
        buf.reserve(buffer_size);
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = &mut handshake, if handshake_pending => {
                handshake_pending = false;
                ws.handshake_timed_out();
            }
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    trace!(id = ws.id(), n, "read");
                    ws.feed(&buf);
                    if handshake_pending && ws.ready_state() != ConnectionState::Connecting {
                        handshake_pending = false;
                    }
                }
                Err(e) => {
                    ws.transport_error(e.into());
                    break;
                }
            },
        }
    }
    ws.eot();
}

async fn watch_connection(ws: WebSocket, interval: Duration, deadline: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = ws.closed() => break,
            _ = ticker.tick() => ws.check_alive(Instant::now(), deadline),
        }
    }
}
