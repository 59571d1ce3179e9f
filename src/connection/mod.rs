//! The per-connection state machine.
//!
//! [`Connection`] is transport-agnostic: the engine (or any other owner of a
//! socket) feeds it bytes, drains its outbound queue and dispatches the
//! [`Event`]s it raises.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting ──handshake──▶ Open ──close──▶ Closing ──▶ Closed
//!     │                                                   ▲
//!     └───────── transport lost ──▶ NeverConnected        │
//!     └───────── handshake rejected ──────────────────────┘
//! ```

mod fragmenter;
mod queue;
mod role;
mod state;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::{Connection, DefaultHooks, Event, HandshakeHooks, WriteDemand};
pub use fragmenter::MessageFragmenter;
pub use queue::OutboundQueue;
pub use role::Role;
pub use state::ConnectionState;
