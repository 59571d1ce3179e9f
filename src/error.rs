//! Error types for the WebSocket engine.
//!
//! Every failure the engine can report is an [`Error`]. When an error ends a
//! connection, [`Error::close_code`] names the status the connection is closed
//! with, so the state machine has one place to look that mapping up.

use crate::message::CloseCode;
use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Opening handshake exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Payload length does not fit in memory on this platform.
    #[error("Payload of {size} bytes exceeds platform limit of {max}")]
    PayloadTooLargeForPlatform {
        /// Announced length.
        size: u64,
        /// Largest addressable length.
        max: u64,
    },

    /// Outbound queue of a slow peer exceeded its limit.
    #[error("Outbound queue full: {size} bytes queued (max: {max})")]
    OutboundQueueFull {
        /// Bytes queued.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Operation requires an open connection.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake needs more bytes. `needed` is zero when the amount is unknown.
    #[error("Incomplete handshake: need {needed} more bytes")]
    IncompleteHandshake {
        /// Number of additional bytes needed, if known.
        needed: usize,
    },

    /// Handshake refused by the application.
    #[error("Handshake rejected ({status}): {reason}")]
    HandshakeRejected {
        /// HTTP status written back to the peer.
        status: u16,
        /// Human-readable reason.
        reason: String,
    },

    /// Header value contains forbidden characters.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Origin not in the configured allow-list.
    #[error("Origin not allowed: {origin}")]
    OriginNotAllowed {
        /// Origin sent by the client.
        origin: String,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Extension failed to transform a payload.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid extension configuration or negotiation.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Close reason not allowed with the given code.
    #[error("Invalid close reason: {0}")]
    InvalidCloseReason(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Operation not supported by the negotiated draft.
    #[error("Not supported by {draft}: {operation}")]
    Unsupported {
        /// Draft name.
        draft: &'static str,
        /// Operation attempted.
        operation: &'static str,
    },

    /// Engine bug. Reported apart from peer misbehaviour.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Close code used when this error terminates a connection.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. }
            | Error::PayloadTooLargeForPlatform { .. }
            | Error::HandshakeTooLarge { .. } => CloseCode::MessageTooBig,
            Error::Extension(_) | Error::OriginNotAllowed { .. } => CloseCode::PolicyViolation,
            Error::Io(_) | Error::OutboundQueueFull { .. } => CloseCode::Abnormal,
            Error::Internal(_) => CloseCode::BuggyClose,
            Error::HandshakeRejected { status: 500, .. } => CloseCode::NeverConnected,
            _ => CloseCode::ProtocolError,
        }
    }

    /// Returns `true` if more input may complete the operation.
    #[must_use]
    pub const fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Error::IncompleteFrame { .. } | Error::IncompleteHandshake { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::InvalidUtf8
    }
}
