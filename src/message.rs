//! WebSocket message types and close codes as defined in RFC 6455.

use crate::error::{Error, Result};

/// Longest close reason that still fits a 125-byte control payload.
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close status code per RFC 6455 Section 7.4.
///
/// Besides the wire codes, three local sentinels report closes that never
/// produced a close frame. Sentinels are never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away (e.g., server shutdown, browser navigating away).
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame or protocol violation.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received data type it cannot handle.
    UnsupportedData,
    /// No status received (1005). Reported when the peer's close frame had no code.
    NoStatus,
    /// Abnormal closure (1006). The transport went away without a close frame.
    Abnormal,
    /// Invalid payload (1007). Endpoint received a message with invalid data (e.g., non-UTF-8 in text).
    InvalidPayload,
    /// Policy violation (1008). Endpoint received a message that violates its policy.
    PolicyViolation,
    /// Message too big (1009). Endpoint received a message too large to process.
    MessageTooBig,
    /// Mandatory extension (1010). Client expected server to negotiate an extension.
    MandatoryExtension,
    /// Internal error (1011). Server encountered an unexpected condition.
    InternalError,
    /// The connection closed before the handshake completed (-1).
    NeverConnected,
    /// The engine hit an internal bug (-2).
    BuggyClose,
    /// The connection served a flash policy file (-3).
    FlashPolicy,
    /// Custom close code (3000-4999 for applications, 1012-1014 for registered codes).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric wire value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value of this code, negative for local sentinels.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            CloseCode::NeverConnected => -1,
            CloseCode::BuggyClose => -2,
            CloseCode::FlashPolicy => -3,
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code as i32,
        }
    }

    /// The 16-bit value of this code, or `None` for local sentinels.
    #[must_use]
    pub const fn as_u16(&self) -> Option<u16> {
        match self {
            CloseCode::NeverConnected | CloseCode::BuggyClose | CloseCode::FlashPolicy => None,
            _ => Some(self.as_i32() as u16),
        }
    }

    /// Returns `true` for the local sentinels.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.as_u16().is_none()
    }

    /// Check if this close code is valid for sending per RFC 6455 Section 7.4.1.
    ///
    /// Valid codes:
    /// - 1000-1003: Normal, GoingAway, ProtocolError, UnsupportedData
    /// - 1007-1011: InvalidPayload, PolicyViolation, MessageTooBig, MandatoryExtension, InternalError
    /// - 1012-1014: ServiceRestart, TryAgainLater, BadGateway (RFC 6455 registered)
    /// - 3000-4999: Reserved for libraries/frameworks and applications
    ///
    /// Reserved codes and the local sentinels are never valid.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        match self.as_u16() {
            Some(code) => matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999),
            None => false,
        }
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame.
    ///
    /// Reserved codes per RFC 6455 Section 7.4.1:
    /// - 1004: Reserved
    /// - 1005: No Status Received (MUST NOT be set by endpoint)
    /// - 1006: Abnormal Closure (MUST NOT be set by endpoint)
    /// - 1015: TLS Handshake (MUST NOT be set by endpoint)
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        match self.as_u16() {
            Some(code) => matches!(code, 1004..=1006 | 1015),
            None => false,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Close status: code plus UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes).
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Serialize into a close frame payload.
    ///
    /// `NoStatus` with an empty reason produces an empty payload.
    ///
    /// # Errors
    ///
    /// Fails for sentinels, reserved or out-of-range codes, for a reason
    /// attached to `NoStatus`, and for reasons longer than 123 bytes.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        if self.code == CloseCode::NoStatus {
            if !self.reason.is_empty() {
                return Err(Error::InvalidCloseReason(
                    "a close frame must have a code if it has a reason".into(),
                ));
            }
            return Ok(Vec::new());
        }
        let Some(code) = self.code.as_u16().filter(|_| self.code.is_valid()) else {
            return Err(Error::InvalidCloseCode(
                self.code.as_u16().unwrap_or_default(),
            ));
        };
        if self.reason.len() > MAX_CLOSE_REASON {
            return Err(Error::ControlFrameTooLarge(self.reason.len() + 2));
        }

        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        Ok(payload)
    }

    /// Parse a received close frame payload.
    ///
    /// An empty payload reports [`CloseCode::NoStatus`].
    ///
    /// # Errors
    ///
    /// Fails for a one-byte payload, a code that may not appear on the wire,
    /// or a reason that is not valid UTF-8.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        match payload.len() {
            0 => Ok(Self::new(CloseCode::NoStatus, "")),
            1 => Err(Error::ProtocolViolation(
                "close payload must be empty or at least 2 bytes".into(),
            )),
            _ => {
                let raw = u16::from_be_bytes([payload[0], payload[1]]);
                let code = CloseCode::from_u16(raw);
                if !code.is_valid() {
                    return Err(Error::InvalidCloseCode(raw));
                }
                let reason = std::str::from_utf8(&payload[2..])?;
                Ok(Self::new(code, reason))
            }
        }
    }
}

/// WebSocket message types.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
    /// A ping frame (control frame, payload <= 125 bytes).
    Ping(Vec<u8>),
    /// A pong frame (control frame, payload <= 125 bytes).
    Pong(Vec<u8>),
    /// A close frame (control frame, may include status code and reason).
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Create a ping message.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Message::Ping(data.into())
    }

    /// Create a pong message.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Message::Pong(data.into())
    }

    /// Create a close message with status code and reason.
    #[must_use]
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Message::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` if this is a binary message.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Returns `true` if this is a data message (text or binary).
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Message::Text(_) | Message::Binary(_))
    }

    /// Returns `true` if this is a control message (ping, pong, or close).
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::Close(_)
        )
    }

    /// Consume and return the text content, if this is a text message.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Consume and return the binary content, if this is a binary message.
    #[must_use]
    pub fn into_binary(self) -> Option<Vec<u8>> {
        match self {
            Message::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the binary content, if this is a binary message.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(data) => Some(data),
            _ => None,
        }
    }
}
