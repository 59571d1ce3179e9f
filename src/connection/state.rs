//! Ready state of a connection.

/// WebSocket ready state.
///
/// ```text
/// Connecting ──► Open ──► Closing ──► Closed
///      │                                ▲
///      ├────────────────────────────────┘ (handshake refused)
///      └──► NeverConnected                (transport lost before a handshake)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Opening handshake in progress.
    #[default]
    Connecting,
    /// Handshake matched; data may flow both ways.
    Open,
    /// A close frame was sent or received.
    Closing,
    /// Both directions are finished.
    Closed,
    /// The transport went away before the connection ever opened.
    NeverConnected,
}

impl ConnectionState {
    /// Returns `false` once the state is terminal.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// `Closed` or `NeverConnected`.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::NeverConnected)
    }

    /// Check if sending data is allowed in this state.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check if frames are still decoded in this state.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::NeverConnected => "NEVER_CONNECTED",
        };
        f.write_str(name)
    }
}
