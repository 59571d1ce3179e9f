//! Shared pieces for the engine integration tests: a recording handler,
//! a loopback server and a client connector.

mod client;
mod recorder;
mod server;

#[allow(unused_imports)]
pub use client::{TestClient, request_for};
pub use recorder::{Record, Recorder};
#[allow(unused_imports)]
pub use server::TestServer;

/// Route engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
