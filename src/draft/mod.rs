//! Protocol revisions ("drafts") and their opening handshakes.
//!
//! A [`Draft`] decides whether a handshake belongs to its revision, fills in
//! the headers that revision requires, and owns the codec and extension a
//! connection uses once it is open. The drafts handed to a server or client
//! are templates: every connection works on its own
//! [`copy_instance`](Draft::copy_instance), so negotiated extension state is
//! never shared.
//!
//! | Draft | Version token | Framing | Close handshake |
//! |---|---|---|---|
//! | RFC 6455 | 13 | length prefixed | two-way |
//! | draft-17 | 13 | length prefixed | two-way |
//! | draft-10 | 8 (7 accepted) | length prefixed | two-way |
//! | hixie-76 | none | sentinels | one-way |
//! | hixie-75 | none | sentinels | none |

mod hixie75;
#[cfg(feature = "hixie76")]
mod hixie76;
mod protocol;
mod rfc6455;

use bytes::BytesMut;

pub use hixie75::Hixie75Draft;
#[cfg(feature = "hixie76")]
pub use hixie76::Hixie76Draft;
pub use protocol::SubProtocol;
pub use rfc6455::{Revision, Rfc6455Draft};

use crate::config::Config;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::protocol::handshake::{ClientHandshake, Headers, ServerHandshake};

/// Outcome of checking a handshake against a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// The handshake belongs to this draft.
    Matched,
    /// It does not.
    NotMatched,
    /// More bytes are needed before deciding.
    Matching,
}

/// How a draft ends a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseHandshakeType {
    /// No close frame exists; the transport simply ends.
    None,
    /// One side sends a close frame and drops the transport.
    OneWay,
    /// Both sides exchange close frames.
    TwoWay,
}

/// `Upgrade: websocket` (any case) and a `Connection` header naming `upgrade`.
pub(crate) fn basic_accept(headers: &Headers) -> bool {
    headers.field("Upgrade").eq_ignore_ascii_case("websocket")
        && headers
            .field("Connection")
            .to_ascii_lowercase()
            .contains("upgrade")
}

/// `Sec-WebSocket-Version` as a number.
pub(crate) fn read_version(headers: &Headers) -> Option<u32> {
    headers.field("Sec-WebSocket-Version").trim().parse().ok()
}

pub(crate) fn random_u32() -> Result<u32> {
    let mut raw = [0u8; 4];
    getrandom::getrandom(&mut raw).map_err(|e| Error::Io(e.to_string()))?;
    Ok(u32::from_ne_bytes(raw))
}

/// One protocol revision.
#[derive(Debug)]
#[non_exhaustive]
pub enum Draft {
    /// RFC 6455 and the drafts sharing its framing.
    Rfc6455(Rfc6455Draft),
    /// draft-hixie-thewebsocketprotocol-75.
    Hixie75(Hixie75Draft),
    /// draft-hixie-thewebsocketprotocol-76.
    #[cfg(feature = "hixie76")]
    Hixie76(Hixie76Draft),
}

impl Draft {
    #[must_use]
    pub fn rfc6455() -> Self {
        Draft::Rfc6455(Rfc6455Draft::new())
    }

    #[must_use]
    pub fn draft17() -> Self {
        Draft::Rfc6455(Rfc6455Draft::with_revision(Revision::Draft17))
    }

    #[must_use]
    pub fn draft10() -> Self {
        Draft::Rfc6455(Rfc6455Draft::with_revision(Revision::Draft10))
    }

    #[must_use]
    pub fn hixie75() -> Self {
        Draft::Hixie75(Hixie75Draft::new())
    }

    #[cfg(feature = "hixie76")]
    #[must_use]
    pub fn hixie76() -> Self {
        Draft::Hixie76(Hixie76Draft::new())
    }

    /// Every draft this build understands, newest first.
    #[must_use]
    pub fn all() -> Vec<Draft> {
        let mut drafts = vec![Self::rfc6455(), Self::draft17(), Self::draft10()];
        #[cfg(feature = "hixie76")]
        drafts.push(Self::hixie76());
        drafts.push(Self::hixie75());
        drafts
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Draft::Rfc6455(d) => d.revision().name(),
            Draft::Hixie75(_) => hixie75::NAME,
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(_) => hixie76::NAME,
        }
    }

    /// Server side: does `request` belong to this draft?
    ///
    /// For RFC 6455 this also binds the negotiated extension and
    /// sub-protocol.
    pub fn accept_as_server(&mut self, request: &ClientHandshake) -> HandshakeState {
        match self {
            Draft::Rfc6455(d) => d.accept_as_server(request),
            Draft::Hixie75(d) => d.accept_as_server(request),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.accept_as_server(request),
        }
    }

    /// Client side: does `response` answer `request` under this draft?
    pub fn accept_as_client(
        &mut self,
        request: &ClientHandshake,
        response: &ServerHandshake,
    ) -> HandshakeState {
        match self {
            Draft::Rfc6455(d) => d.accept_as_client(request, response),
            Draft::Hixie75(d) => d.accept_as_client(request, response),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.accept_as_client(request, response),
        }
    }

    /// Add the headers this draft requires to an outgoing request.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if no randomness is available for keys.
    pub fn post_process_request_as_client(&mut self, request: &mut ClientHandshake) -> Result<()> {
        match self {
            Draft::Rfc6455(d) => d.post_process_request_as_client(request),
            Draft::Hixie75(d) => d.post_process_request_as_client(request),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.post_process_request_as_client(request),
        }
    }

    /// Fill in the response to an accepted `request`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the request lacks what the response
    /// must be derived from.
    pub fn post_process_response_as_server(
        &mut self,
        request: &ClientHandshake,
        response: &mut ServerHandshake,
    ) -> Result<()> {
        match self {
            Draft::Rfc6455(d) => d.post_process_response_as_server(request, response),
            Draft::Hixie75(d) => d.post_process_response_as_server(request, response),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.post_process_response_as_server(request, response),
        }
    }

    /// Parse a request, returning it and the bytes it used.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteHandshake` until the whole handshake has arrived,
    /// `Error::InvalidHandshake` for malformed input.
    pub fn translate_request(&self, buf: &[u8]) -> Result<(ClientHandshake, usize)> {
        match self {
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.translate_request(buf),
            _ => ClientHandshake::parse(buf),
        }
    }

    /// Parse a response, returning it and the bytes it used.
    ///
    /// # Errors
    ///
    /// See [`translate_request`](Self::translate_request).
    pub fn translate_response(&self, buf: &[u8]) -> Result<(ServerHandshake, usize)> {
        match self {
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.translate_response(buf),
            _ => ServerHandshake::parse(buf),
        }
    }

    /// Decode inbound bytes into frames.
    ///
    /// # Errors
    ///
    /// Any framing, limit or extension error.
    pub fn decode(&mut self, data: &[u8], out: &mut Vec<Frame>) -> Result<()> {
        match self {
            Draft::Rfc6455(d) => d.decode(data, out),
            Draft::Hixie75(d) => d.decode(data, out),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.decode(data, out),
        }
    }

    /// Encode one frame.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` for frames the draft cannot carry, extension
    /// failures, or a missing random source for the mask.
    pub fn encode(&mut self, frame: Frame, out: &mut BytesMut) -> Result<()> {
        match self {
            Draft::Rfc6455(d) => d.encode(frame, out),
            Draft::Hixie75(d) => d.encode(&frame, out),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.encode(&frame, out),
        }
    }

    #[must_use]
    pub fn close_handshake_type(&self) -> CloseHandshakeType {
        match self {
            Draft::Rfc6455(_) => CloseHandshakeType::TwoWay,
            Draft::Hixie75(_) => CloseHandshakeType::None,
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(_) => CloseHandshakeType::OneWay,
        }
    }

    /// A fresh per-connection copy: same configuration, no negotiated state.
    #[must_use]
    pub fn copy_instance(&self) -> Draft {
        match self {
            Draft::Rfc6455(d) => Draft::Rfc6455(d.copy_instance()),
            Draft::Hixie75(d) => Draft::Hixie75(d.copy_instance()),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => Draft::Hixie76(d.copy_instance()),
        }
    }

    /// Drop partial frames and release extension state.
    pub fn reset(&mut self) {
        match self {
            Draft::Rfc6455(d) => d.reset(),
            Draft::Hixie75(d) => d.reset(),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.reset(),
        }
    }

    /// Set the local role and limits used by the codec.
    pub fn configure(&mut self, role: Role, config: &Config) {
        match self {
            Draft::Rfc6455(d) => d.configure(role, config),
            Draft::Hixie75(d) => d.configure(role, config),
            #[cfg(feature = "hixie76")]
            Draft::Hixie76(d) => d.configure(role, config),
        }
    }

    /// Sub-protocol in force after the handshake.
    #[must_use]
    pub fn negotiated_protocol(&self) -> Option<&str> {
        match self {
            Draft::Rfc6455(d) => d.protocol().map(SubProtocol::name),
            _ => None,
        }
    }

    /// Name of the extension in force, empty when none.
    #[must_use]
    pub fn negotiated_extension(&self) -> &str {
        match self {
            Draft::Rfc6455(d) => d.extension().name(),
            _ => "",
        }
    }

    /// Whether ping and pong frames exist in this draft.
    #[must_use]
    pub fn supports_ping(&self) -> bool {
        matches!(self, Draft::Rfc6455(_))
    }

    /// Whether a message may span several frames.
    #[must_use]
    pub fn supports_fragmentation(&self) -> bool {
        matches!(self, Draft::Rfc6455(_))
    }
}

impl From<Rfc6455Draft> for Draft {
    fn from(draft: Rfc6455Draft) -> Self {
        Draft::Rfc6455(draft)
    }
}

impl From<Hixie75Draft> for Draft {
    fn from(draft: Hixie75Draft) -> Self {
        Draft::Hixie75(draft)
    }
}

#[cfg(feature = "hixie76")]
impl From<Hixie76Draft> for Draft {
    fn from(draft: Hixie76Draft) -> Self {
        Draft::Hixie76(draft)
    }
}
