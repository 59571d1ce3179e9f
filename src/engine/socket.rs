use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, watch};
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionState, Event};
use crate::engine::handler::{HandlerHooks, WebSocketHandler};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};
use crate::protocol::OpCode;

struct Shared {
    id: u64,
    conn: Mutex<Connection>,
    dispatch: Mutex<Dispatch>,
    writable: Arc<Notify>,
    closed: watch::Sender<bool>,
    handler: Arc<dyn WebSocketHandler>,
}

/// Events waiting for the handler, in the order the connection raised them.
///
/// At most one thread drains the queue at a time; callers that find a
/// drain in progress leave their events to it.
#[derive(Default)]
struct Dispatch {
    pending: VecDeque<Event>,
    draining: bool,
}

/// Clears `draining` if a handler panics mid-drain.
struct DrainGuard<'a> {
    dispatch: &'a Mutex<Dispatch>,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.dispatch.lock().draining = false;
        }
    }
}

/// Handle to one engine-driven connection.
///
/// Cloning is cheap; every clone refers to the same connection. Methods lock
/// the connection only for the duration of the state change and run the
/// resulting handler callbacks after the lock is released. Callbacks for one
/// connection never overlap and arrive in the order the events were raised,
/// whichever task or worker raised them.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.inner.id)
            .field("state", &self.ready_state())
            .finish()
    }
}

impl WebSocket {
    /// Wrap `conn`, wiring its hooks and write demand to this handle.
    pub(crate) fn new(id: u64, conn: Connection, handler: Arc<dyn WebSocketHandler>) -> Self {
        let writable = Arc::new(Notify::new());
        let demand = Arc::clone(&writable);
        let conn = conn
            .with_hooks(Arc::new(HandlerHooks(Arc::clone(&handler))))
            .with_write_demand(Arc::new(move || demand.notify_one()));
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Shared {
                id,
                conn: Mutex::new(conn),
                dispatch: Mutex::new(Dispatch::default()),
                writable,
                closed,
                handler,
            }),
        }
    }

    /// Run `f` on the locked connection, then dispatch the events it raised.
    pub(crate) fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> R {
        let result = {
            let mut conn = self.inner.conn.lock();
            let result = f(&mut conn);
            let events = conn.take_events();
            // Queued while the connection is still locked, so raise order
            // and queue order agree.
            if !events.is_empty() {
                self.inner.dispatch.lock().pending.extend(events);
            }
            result
        };
        self.drain();
        result
    }

    /// Deliver queued events unless another caller is already doing so.
    fn drain(&self) {
        {
            let mut dispatch = self.inner.dispatch.lock();
            if dispatch.draining || dispatch.pending.is_empty() {
                return;
            }
            dispatch.draining = true;
        }
        let mut guard = DrainGuard {
            dispatch: &self.inner.dispatch,
            finished: false,
        };
        loop {
            let next = {
                let mut dispatch = self.inner.dispatch.lock();
                let next = dispatch.pending.pop_front();
                if next.is_none() {
                    dispatch.draining = false;
                    guard.finished = true;
                }
                next
            };
            match next {
                Some(event) => self.dispatch(event),
                None => return,
            }
        }
    }

    fn dispatch(&self, event: Event) {
        let handler = &self.inner.handler;
        match event {
            Event::Open { request, response } => handler.on_open(self, &request, &response),
            Event::Message(message) => handler.on_message(self, message),
            Event::Ping(payload) => handler.on_ping(self, &payload),
            Event::Pong(payload) => handler.on_pong(self, &payload),
            Event::CloseInitiated { code, reason } => {
                handler.on_close_initiated(self, code, &reason);
            }
            Event::Closing {
                code,
                reason,
                remote,
            } => handler.on_closing(self, code, &reason, remote),
            Event::Close {
                code,
                reason,
                remote,
            } => {
                handler.on_close(self, code, &reason, remote);
                self.inner.closed.send_replace(true);
                self.inner.writable.notify_one();
            }
            Event::Error(error) => handler.on_error(self, &error),
        }
    }

    /// Engine-assigned identifier, unique per server or client.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn ready_state(&self) -> ConnectionState {
        self.inner.conn.lock().ready_state()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ready_state() == ConnectionState::Open
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.conn.lock().remote_addr()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.conn.lock().local_addr()
    }

    /// Sub-protocol agreed during the handshake.
    #[must_use]
    pub fn negotiated_protocol(&self) -> Option<String> {
        self.inner
            .conn
            .lock()
            .negotiated_protocol()
            .map(str::to_string)
    }

    /// Bytes waiting to be written.
    #[must_use]
    pub fn buffered_amount(&self) -> usize {
        self.inner.conn.lock().outbound_len()
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// `Error::NotConnected` unless the connection is open.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.with_conn(|c| c.send_text(text))
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// `Error::NotConnected` unless open, `Error::Unsupported` on text-only
    /// drafts.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        self.with_conn(|c| c.send_binary(data))
    }

    /// Send any message; `Message::Close` closes.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send(&self, message: Message) -> Result<()> {
        self.with_conn(|c| c.send(message))
    }

    /// Send one fragment of a streamed message.
    ///
    /// # Errors
    ///
    /// `Error::ProtocolViolation` when the fragment does not continue the
    /// open message.
    pub fn send_fragment(&self, opcode: OpCode, data: impl Into<Bytes>, fin: bool) -> Result<()> {
        let data = data.into();
        self.with_conn(|c| c.send_fragment(opcode, data, fin))
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` on drafts without ping frames.
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.with_conn(|c| c.send_ping(payload))
    }

    /// Start closing. Later calls have no effect.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_conn(|c| c.close(code, reason));
    }

    /// Wait until the connection is finished.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    pub(crate) fn closed_receiver(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }

    pub(crate) fn feed(&self, data: &[u8]) {
        self.with_conn(|c| c.decode(data));
    }

    pub(crate) fn eot(&self) {
        self.with_conn(Connection::eot);
    }

    pub(crate) fn transport_error(&self, error: Error) {
        self.with_conn(|c| c.transport_error(error));
    }

    pub(crate) fn check_alive(&self, now: Instant, deadline: Duration) {
        self.with_conn(|c| c.check_alive(now, deadline));
    }

    /// Close a connection still handshaking after the timeout.
    pub(crate) fn handshake_timed_out(&self) {
        self.with_conn(|c| {
            if c.ready_state() == ConnectionState::Connecting {
                debug!(remote = ?c.remote_addr(), "Handshake timed out");
                c.close(CloseCode::ProtocolError, "handshake timed out");
            }
        });
    }

    /// Queued output, or `None` once the transport should be shut down.
    fn next_write(&self, cap: usize) -> Option<Vec<Bytes>> {
        self.with_conn(|c| {
            let batch = c.next_batch(cap);
            if batch.is_empty() && c.should_shutdown() {
                None
            } else {
                Some(batch)
            }
        })
    }
}

/// Drain a connection's outbound queue into `writer`, at most `batch` bytes
/// per pass, until the connection asks for the transport to be shut down.
pub(crate) async fn write_loop<W>(ws: WebSocket, mut writer: W, batch: usize)
where
    W: AsyncWrite + Unpin,
{
    let writable = Arc::clone(&ws.inner.writable);
    while let Some(chunks) = ws.next_write(batch) {
        if chunks.is_empty() {
            writable.notified().await;
            continue;
        }
        let mut written = 0;
        for chunk in &chunks {
            if let Err(e) = writer.write_all(chunk).await {
                ws.transport_error(e.into());
                return;
            }
            written += chunk.len();
        }
        if let Err(e) = writer.flush().await {
            ws.transport_error(e.into());
            return;
        }
        trace!(id = ws.id(), written, "write pass");
        tokio::task::yield_now().await;
    }
    if let Err(e) = writer.shutdown().await {
        trace!(id = ws.id(), error = %e, "Transport shutdown failed");
    }
    ws.with_conn(Connection::finish);
}
