//! Loopback server on a random port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use wsengine::{Config, Draft, WebSocketServer};

use super::{Recorder, init_tracing};

pub struct TestServer {
    pub server: WebSocketServer,
    pub addr: SocketAddr,
    pub handler: Arc<Recorder>,
}

impl TestServer {
    /// Echo server accepting every draft.
    pub async fn spawn() -> Self {
        Self::spawn_with(Recorder::echo(), Config::default(), Draft::all()).await
    }

    pub async fn spawn_with(handler: Arc<Recorder>, config: Config, drafts: Vec<Draft>) -> Self {
        init_tracing();
        let server =
            WebSocketServer::bind_with_drafts("127.0.0.1:0", Arc::clone(&handler), config, drafts)
                .await
                .unwrap();
        let runner = server.clone();
        tokio::spawn(async move { runner.run().await.unwrap() });
        let addr = server.local_addr();
        Self {
            server,
            addr,
            handler,
        }
    }

    pub async fn shutdown(&self) {
        self.server.stop(Duration::from_secs(2)).await;
    }
}
