use std::time::SystemTime;

use bytes::BytesMut;
use tracing::debug;

use crate::codec::FrameCodec;
use crate::config::Config;
use crate::connection::Role;
use crate::draft::{HandshakeState, SubProtocol, basic_accept, read_version};
use crate::error::{Error, Result};
use crate::extensions::{Extension, IdentityExtension};
use crate::protocol::Frame;
use crate::protocol::handshake::{
    ClientHandshake, ServerHandshake, compute_accept_key, generate_key, http_date,
};

/// Revisions sharing the RFC 6455 frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// draft-ietf-hybi-thewebsocketprotocol-10.
    Draft10,
    /// draft-ietf-hybi-thewebsocketprotocol-17.
    Draft17,
    /// The final protocol, with extension and sub-protocol negotiation.
    Rfc6455,
}

impl Revision {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Revision::Draft10 => "draft-10",
            Revision::Draft17 => "draft-17",
            Revision::Rfc6455 => "RFC 6455",
        }
    }

    /// Token sent in `Sec-WebSocket-Version`.
    #[must_use]
    pub const fn version(self) -> u32 {
        match self {
            Revision::Draft10 => 8,
            Revision::Draft17 | Revision::Rfc6455 => 13,
        }
    }

    fn accepts_version(self, version: u32) -> bool {
        match self {
            Revision::Draft10 => version == 7 || version == 8,
            Revision::Draft17 | Revision::Rfc6455 => version == 13,
        }
    }

    fn negotiates(self) -> bool {
        self == Revision::Rfc6455
    }
}

/// Negotiator and codec for RFC 6455 and its late drafts.
///
/// Extensions are tried in the order they were added; the identity
/// extension is always last, so a handshake never fails for lack of a
/// matching extension. Sub-protocols are chosen in this draft's order from
/// whatever the client offered.
#[derive(Debug)]
pub struct Rfc6455Draft {
    revision: Revision,
    known_extensions: Vec<Box<dyn Extension>>,
    active: usize,
    known_protocols: Vec<SubProtocol>,
    protocol: Option<SubProtocol>,
    codec: FrameCodec,
}

impl Default for Rfc6455Draft {
    fn default() -> Self {
        Self::new()
    }
}

impl Rfc6455Draft {
    #[must_use]
    pub fn new() -> Self {
        Self::with_revision(Revision::Rfc6455)
    }

    #[must_use]
    pub fn with_revision(revision: Revision) -> Self {
        Self {
            revision,
            known_extensions: vec![Box::new(IdentityExtension)],
            active: 0,
            known_protocols: Vec::new(),
            protocol: None,
            codec: FrameCodec::new(Role::Server, &Config::default()),
        }
    }

    /// Offer or accept `extension`, ahead of the ones added later.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Extension + 'static) -> Self {
        let identity = self.known_extensions.len() - 1;
        self.known_extensions.insert(identity, Box::new(extension));
        self.active = self.known_extensions.len() - 1;
        self
    }

    /// Offer or accept `protocol`, in preference order.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<SubProtocol>) -> Self {
        self.known_protocols.push(protocol.into());
        self
    }

    #[must_use]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// The bound extension; identity until a handshake picked another.
    #[must_use]
    pub fn extension(&self) -> &dyn Extension {
        self.known_extensions[self.active].as_ref()
    }

    #[must_use]
    pub fn protocol(&self) -> Option<&SubProtocol> {
        self.protocol.as_ref()
    }

    #[must_use]
    pub fn known_protocols(&self) -> &[SubProtocol] {
        &self.known_protocols
    }

    fn identity_index(&self) -> usize {
        self.known_extensions.len() - 1
    }

    pub(crate) fn accept_as_server(&mut self, request: &ClientHandshake) -> HandshakeState {
        let version_ok = read_version(&request.headers)
            .is_some_and(|version| self.revision.accepts_version(version));
        if !version_ok
            || !basic_accept(&request.headers)
            || request.field("Sec-WebSocket-Key").is_empty()
        {
            return HandshakeState::NotMatched;
        }
        if !self.revision.negotiates() {
            return HandshakeState::Matched;
        }

        let offered = request.field("Sec-WebSocket-Extensions");
        self.active = self
            .known_extensions
            .iter_mut()
            .position(|ext| ext.accept_offer(offered))
            .unwrap_or_else(|| self.known_extensions.len() - 1);

        let offered = request.field("Sec-WebSocket-Protocol");
        self.protocol = self
            .known_protocols
            .iter()
            .find(|protocol| protocol.accepts(offered))
            .cloned();

        debug!(
            draft = self.revision.name(),
            extension = self.extension().name(),
            protocol = ?self.protocol.as_ref().map(SubProtocol::name),
            "Negotiated server handshake"
        );
        HandshakeState::Matched
    }

    pub(crate) fn accept_as_client(
        &mut self,
        request: &ClientHandshake,
        response: &ServerHandshake,
    ) -> HandshakeState {
        if response.status != 101 || !basic_accept(&response.headers) {
            return HandshakeState::NotMatched;
        }
        let key = request.field("Sec-WebSocket-Key");
        let accept = response.field("Sec-WebSocket-Accept");
        if key.is_empty() || accept.is_empty() || compute_accept_key(key) != accept.trim() {
            return HandshakeState::NotMatched;
        }
        if !self.revision.negotiates() {
            return HandshakeState::Matched;
        }

        let answered = response.field("Sec-WebSocket-Extensions");
        match self
            .known_extensions
            .iter_mut()
            .position(|ext| ext.accept_response(answered))
        {
            Some(index) => self.active = index,
            None => {
                debug!(extensions = answered, "Server answered an extension we did not offer");
                return HandshakeState::NotMatched;
            }
        }

        let answered = response.field("Sec-WebSocket-Protocol").trim();
        if answered.is_empty() {
            self.protocol = None;
        } else {
            match self.known_protocols.iter().find(|p| p.name() == answered) {
                Some(protocol) => self.protocol = Some(protocol.clone()),
                None => {
                    debug!(protocol = answered, "Server chose a protocol we did not offer");
                    return HandshakeState::NotMatched;
                }
            }
        }
        HandshakeState::Matched
    }

    pub(crate) fn post_process_request_as_client(
        &mut self,
        request: &mut ClientHandshake,
    ) -> Result<()> {
        request.headers.set("Upgrade", "websocket");
        request.headers.set("Connection", "Upgrade");
        request.headers.set("Sec-WebSocket-Key", generate_key()?);
        request
            .headers
            .set("Sec-WebSocket-Version", self.revision.version().to_string());
        if !self.revision.negotiates() {
            return Ok(());
        }

        let offers: Vec<String> = self
            .known_extensions
            .iter()
            .filter_map(|ext| ext.client_offer())
            .filter(|offer| !offer.is_empty())
            .collect();
        if !offers.is_empty() {
            request
                .headers
                .set("Sec-WebSocket-Extensions", offers.join(", "));
        }
        let protocols: Vec<&str> = self
            .known_protocols
            .iter()
            .map(SubProtocol::name)
            .filter(|name| !name.is_empty())
            .collect();
        if !protocols.is_empty() {
            request
                .headers
                .set("Sec-WebSocket-Protocol", protocols.join(", "));
        }
        Ok(())
    }

    pub(crate) fn post_process_response_as_server(
        &mut self,
        request: &ClientHandshake,
        response: &mut ServerHandshake,
    ) -> Result<()> {
        let key = request.field("Sec-WebSocket-Key");
        if key.is_empty() {
            return Err(Error::InvalidHandshake("missing Sec-WebSocket-Key".into()));
        }
        response.headers.set("Upgrade", "websocket");
        response
            .headers
            .set("Connection", request.field("Connection"));
        response
            .headers
            .set("Sec-WebSocket-Accept", compute_accept_key(key));

        if !self.revision.negotiates() {
            response.status_message = "Switching Protocols".to_string();
            return Ok(());
        }
        if let Some(answer) = self.extension().server_response().filter(|a| !a.is_empty()) {
            response.headers.set("Sec-WebSocket-Extensions", answer);
        }
        if let Some(protocol) = self.protocol.as_ref().filter(|p| !p.name().is_empty()) {
            response
                .headers
                .set("Sec-WebSocket-Protocol", protocol.name());
        }
        response.status_message = "Web Socket Protocol Handshake".to_string();
        response.headers.set("Server", "wsengine");
        response.headers.set("Date", http_date(SystemTime::now()));
        Ok(())
    }

    pub(crate) fn decode(&mut self, data: &[u8], out: &mut Vec<Frame>) -> Result<()> {
        self.codec
            .decode(data, self.known_extensions[self.active].as_mut(), out)
    }

    pub(crate) fn encode(&mut self, frame: Frame, out: &mut BytesMut) -> Result<()> {
        self.codec
            .encode(frame, self.known_extensions[self.active].as_mut(), out)
    }

    pub(crate) fn copy_instance(&self) -> Self {
        Self {
            revision: self.revision,
            known_extensions: self
                .known_extensions
                .iter()
                .map(|ext| ext.copy_instance())
                .collect(),
            active: self.identity_index(),
            known_protocols: self.known_protocols.clone(),
            protocol: None,
            codec: self.codec.fresh(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.codec.reset();
        self.known_extensions[self.active].reset();
    }

    pub(crate) fn configure(&mut self, role: Role, config: &Config) {
        self.codec = FrameCodec::new(role, config);
    }
}
