//! # wsengine - Multi-draft WebSocket protocol engine
//!
//! `wsengine` speaks RFC 6455 and the drafts that preceded it (draft-10,
//! draft-17, hixie-75 and, behind the `hixie76` feature, hixie-76) from one
//! connection type.
//!
//! ## Layers
//!
//! - [`protocol`]: frames, masking, UTF-8 validation, HTTP handshakes
//! - [`codec`]: resumable frame codecs for length-prefixed and sentinel framing
//! - [`extensions`]: the extension pipeline and permessage-deflate
//! - [`draft`]: handshake negotiation per draft
//! - [`connection`]: the sans-io state machine
//! - `engine`: tokio server and client (feature `async-tokio`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsengine::{Config, WebSocketServer};
//!
//! let server = WebSocketServer::bind("127.0.0.1:9000", Arc::new(Echo), Config::default()).await?;
//! server.run().await?;
//! ```
//!
//! Without the engine, drive a [`Connection`] directly: feed it bytes with
//! `decode`, write out `next_batch`, and handle `take_events`.

pub mod codec;
pub mod config;
pub mod connection;
pub mod draft;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod engine;

pub use config::{Config, Limits, Timeouts};
pub use connection::{Connection, ConnectionState, Event, HandshakeHooks, Role};
pub use draft::{CloseHandshakeType, Draft, HandshakeState};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{ClientHandshake, OpCode, ServerHandshake, WS_GUID, compute_accept_key};

#[cfg(feature = "async-tokio")]
pub use engine::{WebSocket, WebSocketClient, WebSocketHandler, WebSocketServer};
