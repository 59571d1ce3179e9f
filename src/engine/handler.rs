use std::net::SocketAddr;
use std::sync::Arc;

use crate::connection::{DefaultHooks, HandshakeHooks};
use crate::engine::WebSocket;
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};
use crate::protocol::handshake::{ClientHandshake, ServerHandshake};

/// Application callbacks for one server or client.
///
/// Callbacks run on engine threads (a decode worker, a writer task or the
/// task that called a [`WebSocket`] method) and never while the connection is
/// locked, so they may freely call back into the handle.
pub trait WebSocketHandler: Send + Sync + 'static {
    /// The opening handshake completed.
    fn on_open(&self, ws: &WebSocket, request: &ClientHandshake, response: &ServerHandshake);

    fn on_message(&self, ws: &WebSocket, message: Message);

    /// The connection is finished. Called exactly once per connection.
    fn on_close(&self, ws: &WebSocket, code: CloseCode, reason: &str, remote: bool);

    fn on_error(&self, ws: &WebSocket, error: &Error);

    /// Reading stopped; queued output is still being flushed.
    fn on_closing(&self, _ws: &WebSocket, _code: CloseCode, _reason: &str, _remote: bool) {}

    /// This side sent the first close frame.
    fn on_close_initiated(&self, _ws: &WebSocket, _code: CloseCode, _reason: &str) {}

    /// A ping arrived. The pong has already been queued.
    fn on_ping(&self, _ws: &WebSocket, _payload: &[u8]) {}

    fn on_pong(&self, _ws: &WebSocket, _payload: &[u8]) {}

    /// Server side: accept or reject an upgrade request and add headers.
    ///
    /// # Errors
    ///
    /// Return `Error::HandshakeRejected` to refuse the connection.
    fn on_handshake_as_server(
        &self,
        _request: &ClientHandshake,
        _response: &mut ServerHandshake,
    ) -> Result<()> {
        Ok(())
    }

    /// Client side: check the server's response.
    ///
    /// # Errors
    ///
    /// Any error closes the connection before it opens.
    fn on_handshake_as_client(
        &self,
        _request: &ClientHandshake,
        _response: &ServerHandshake,
    ) -> Result<()> {
        Ok(())
    }

    /// Body answered to a `<policy-file-request/>`.
    ///
    /// # Errors
    ///
    /// The default fails when the local address is unknown.
    fn flash_policy(&self, local_addr: Option<SocketAddr>) -> Result<String> {
        DefaultHooks.flash_policy(local_addr)
    }
}

/// Routes a connection's handshake hooks to its handler.
pub(crate) struct HandlerHooks(pub(crate) Arc<dyn WebSocketHandler>);

impl HandshakeHooks for HandlerHooks {
    fn on_handshake_as_server(
        &self,
        request: &ClientHandshake,
        response: &mut ServerHandshake,
    ) -> Result<()> {
        self.0.on_handshake_as_server(request, response)
    }

    fn on_handshake_as_client(
        &self,
        request: &ClientHandshake,
        response: &ServerHandshake,
    ) -> Result<()> {
        self.0.on_handshake_as_client(request, response)
    }

    fn flash_policy(&self, local_addr: Option<SocketAddr>) -> Result<String> {
        self.0.flash_policy(local_addr)
    }
}
