use bytes::BytesMut;

use crate::codec::SentinelCodec;
use crate::config::Config;
use crate::connection::Role;
use crate::draft::{HandshakeState, basic_accept, random_u32};
use crate::error::Result;
use crate::protocol::Frame;
use crate::protocol::handshake::{ClientHandshake, ServerHandshake};

pub(crate) const NAME: &str = "hixie-75";

/// draft-hixie-thewebsocketprotocol-75: text frames only, no close frame.
#[derive(Debug, Clone)]
pub struct Hixie75Draft {
    codec: SentinelCodec,
}

impl Default for Hixie75Draft {
    fn default() -> Self {
        Self::new()
    }
}

impl Hixie75Draft {
    #[must_use]
    pub fn new() -> Self {
        Self {
            codec: SentinelCodec::new(NAME, Config::default().limits.max_frame_size),
        }
    }

    pub(crate) fn accept_as_server(&mut self, request: &ClientHandshake) -> HandshakeState {
        if request.headers.contains("Origin") && basic_accept(&request.headers) {
            HandshakeState::Matched
        } else {
            HandshakeState::NotMatched
        }
    }

    pub(crate) fn accept_as_client(
        &mut self,
        request: &ClientHandshake,
        response: &ServerHandshake,
    ) -> HandshakeState {
        if response.field("WebSocket-Origin") == request.field("Origin")
            && basic_accept(&response.headers)
        {
            HandshakeState::Matched
        } else {
            HandshakeState::NotMatched
        }
    }

    pub(crate) fn post_process_request_as_client(
        &mut self,
        request: &mut ClientHandshake,
    ) -> Result<()> {
        request.headers.set("Upgrade", "WebSocket");
        request.headers.set("Connection", "Upgrade");
        if !request.headers.contains("Origin") {
            request
                .headers
                .set("Origin", format!("random{}", random_u32()?));
        }
        Ok(())
    }

    pub(crate) fn post_process_response_as_server(
        &mut self,
        request: &ClientHandshake,
        response: &mut ServerHandshake,
    ) -> Result<()> {
        response.status_message = "Web Socket Protocol Handshake".to_string();
        response.headers.set("Upgrade", "WebSocket");
        response
            .headers
            .set("Connection", request.field("Connection"));
        response
            .headers
            .set("WebSocket-Origin", request.field("Origin"));
        response.headers.set(
            "WebSocket-Location",
            format!("ws://{}{}", request.field("Host"), request.resource),
        );
        Ok(())
    }

    pub(crate) fn decode(&mut self, data: &[u8], out: &mut Vec<Frame>) -> Result<()> {
        self.codec.decode(data, out)
    }

    pub(crate) fn encode(&self, frame: &Frame, out: &mut BytesMut) -> Result<()> {
        self.codec.encode(frame, out)
    }

    pub(crate) fn copy_instance(&self) -> Self {
        Self {
            codec: self.codec.fresh(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.codec.reset();
    }

    pub(crate) fn configure(&mut self, _role: Role, config: &Config) {
        self.codec = SentinelCodec::new(NAME, config.limits.max_frame_size);
    }
}
