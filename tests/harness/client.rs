//! Client connector for the loopback server.

use std::net::SocketAddr;
use std::sync::Arc;

use wsengine::{ClientHandshake, Config, Draft, WebSocket, WebSocketClient};

use super::Recorder;

pub fn request_for(addr: SocketAddr) -> ClientHandshake {
    let mut request = ClientHandshake::new("/");
    request.headers.set("Host", addr.to_string());
    request
}

pub struct TestClient {
    pub client: WebSocketClient,
    pub handler: Arc<Recorder>,
}

impl TestClient {
    /// Connect with RFC 6455 and wait for the handshake.
    pub async fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(addr, &Draft::rfc6455(), Config::default()).await
    }

    pub async fn connect_with(addr: SocketAddr, draft: &Draft, config: Config) -> Self {
        let handler = Recorder::new();
        let client =
            WebSocketClient::connect(addr, draft, request_for(addr), Arc::clone(&handler), config)
                .await
                .unwrap();
        handler.wait_open().await;
        Self { client, handler }
    }

    pub fn ws(&self) -> &WebSocket {
        self.client.websocket()
    }

    /// Send `text` and wait for the `n`-th message to come back.
    pub async fn round_trip(&self, text: &str, n: usize) -> String {
        self.ws().send_text(text).unwrap();
        self.handler.wait_messages(n).await;
        self.handler.messages()[n - 1]
            .as_text()
            .unwrap()
            .to_string()
    }

    pub async fn close(&self) {
        self.client.close();
        self.client.closed().await;
    }
}
