//! Tokio facade: a multi-connection server and a single-connection client
//! driving [`Connection`](crate::connection::Connection) over real sockets.
//!
//! ```text
//!            accept                 readable + pooled buffer
//! listener ─────────▶ read task ─────────────────────────────▶ decode worker
//!                        │                                           │
//!                        ▼                                           ▼
//!                   write task ◀──── write demand ──── Connection (locked)
//! ```
//!
//! Handler callbacks run after the connection lock is released.

mod buffers;
mod client;
mod handler;
mod server;
mod socket;
mod workers;

pub use client::WebSocketClient;
pub use handler::WebSocketHandler;
pub use server::WebSocketServer;
pub use socket::WebSocket;
