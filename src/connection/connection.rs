use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::queue::OutboundQueue;
use crate::connection::{ConnectionState, Role};
use crate::draft::{CloseHandshakeType, Draft, HandshakeState};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, MAX_CLOSE_REASON, Message};
use crate::protocol::assembler::MessageAssembler;
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::handshake::{
    ClientHandshake, FLASH_POLICY_REQUEST, ServerHandshake, http_error_response, validate_origin,
};
use crate::protocol::{Frame, OpCode};

/// Something the embedding application should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// The opening handshake completed.
    Open {
        request: ClientHandshake,
        response: ServerHandshake,
    },
    /// A complete text or binary message.
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    /// We started the close handshake.
    CloseInitiated { code: CloseCode, reason: String },
    /// No more data will be read; queued bytes are still being written.
    Closing {
        code: CloseCode,
        reason: String,
        remote: bool,
    },
    /// The connection is finished.
    Close {
        code: CloseCode,
        reason: String,
        remote: bool,
    },
    /// A failure on this connection.
    Error(Error),
}

/// Asks the owner of the transport to schedule a write.
pub trait WriteDemand: Send + Sync {
    fn wants_write(&self);
}

impl<F> WriteDemand for F
where
    F: Fn() + Send + Sync,
{
    fn wants_write(&self) {
        self();
    }
}

/// Application hooks consulted during the opening handshake.
pub trait HandshakeHooks: Send + Sync {
    /// Inspect an accepted request and add response headers.
    ///
    /// Returning `Error::HandshakeRejected` with status 500 answers with an
    /// internal server error; any other error answers 404.
    fn on_handshake_as_server(
        &self,
        _request: &ClientHandshake,
        _response: &mut ServerHandshake,
    ) -> Result<()> {
        Ok(())
    }

    /// Inspect the server's answer before the connection opens.
    fn on_handshake_as_client(
        &self,
        _request: &ClientHandshake,
        _response: &ServerHandshake,
    ) -> Result<()> {
        Ok(())
    }

    /// Policy file served to a `<policy-file-request/>`.
    fn flash_policy(&self, local_addr: Option<SocketAddr>) -> Result<String> {
        let addr = local_addr
            .ok_or_else(|| Error::InvalidHandshake("socket is not bound".into()))?;
        Ok(format!(
            "<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"{}\" /></cross-domain-policy>\0",
            addr.port()
        ))
    }
}

/// Hooks that accept every handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl HandshakeHooks for DefaultHooks {}

#[derive(Debug, Clone)]
struct CloseRecord {
    code: CloseCode,
    reason: String,
    remote: bool,
}

/// The per-connection protocol state machine.
///
/// `Connection` owns no transport. Inbound bytes are fed to
/// [`decode`](Self::decode); encoded output accumulates in an outbound queue
/// drained with [`next_batch`](Self::next_batch); everything the
/// application must hear about is collected as [`Event`]s and drained with
/// [`take_events`](Self::take_events), so callbacks never run while the
/// connection is borrowed.
///
/// Every way a connection can end funnels through two steps:
/// `flush_and_close` records the close code once and stops reading, and
/// `close_connection` performs the final transition once, releasing codec
/// and extension state.
pub struct Connection {
    role: Role,
    state: ConnectionState,
    config: Config,
    drafts: Vec<Draft>,
    draft: Option<Draft>,
    handshake_buf: BytesMut,
    request: Option<ClientHandshake>,
    outbound: OutboundQueue,
    events: Vec<Event>,
    close: Option<CloseRecord>,
    flushed: bool,
    opened: bool,
    last_pong: Instant,
    streaming: Option<OpCode>,
    assembler: MessageAssembler,
    write_demand: Option<Arc<dyn WriteDemand>>,
    hooks: Arc<dyn HandshakeHooks>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("draft", &self.draft.as_ref().map(Draft::name))
            .field("outbound", &self.outbound.len())
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

impl Connection {
    fn new(role: Role, config: Config, drafts: Vec<Draft>, draft: Option<Draft>) -> Self {
        let assembler = MessageAssembler::new(config.limits.clone());
        Self {
            role,
            state: ConnectionState::Connecting,
            config,
            drafts,
            draft,
            handshake_buf: BytesMut::new(),
            request: None,
            outbound: OutboundQueue::new(),
            events: Vec::new(),
            close: None,
            flushed: false,
            opened: false,
            last_pong: Instant::now(),
            streaming: None,
            assembler,
            write_demand: None,
            hooks: Arc::new(DefaultHooks),
            local_addr: None,
            remote_addr: None,
        }
    }

    /// A server connection that will accept any of `drafts`, tried in order.
    #[must_use]
    pub fn server(config: Config, drafts: &[Draft]) -> Self {
        let drafts = drafts.iter().map(Draft::copy_instance).collect();
        Self::new(Role::Server, config, drafts, None)
    }

    /// A client connection speaking `draft`.
    #[must_use]
    pub fn client(config: Config, draft: &Draft) -> Self {
        let mut draft = draft.copy_instance();
        draft.configure(Role::Client, &config);
        Self::new(Role::Client, config, Vec::new(), Some(draft))
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn HandshakeHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_write_demand(mut self, demand: Arc<dyn WriteDemand>) -> Self {
        self.write_demand = Some(demand);
        self
    }

    #[must_use]
    pub fn with_addrs(mut self, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        self.local_addr = local;
        self.remote_addr = remote;
        self
    }

    // ==========================================================================
    // Accessors
    // ==========================================================================

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn ready_state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// The draft bound by the handshake.
    #[must_use]
    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    #[must_use]
    pub fn negotiated_protocol(&self) -> Option<&str> {
        self.draft.as_ref().and_then(Draft::negotiated_protocol)
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The request this client sent.
    #[must_use]
    pub fn request(&self) -> Option<&ClientHandshake> {
        self.request.as_ref()
    }

    /// Recorded close code, once `flush_and_close` has run.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        self.close.as_ref().map(|c| c.code)
    }

    #[must_use]
    pub fn last_pong(&self) -> Instant {
        self.last_pong
    }

    #[must_use]
    pub fn is_flushed_and_closed(&self) -> bool {
        self.flushed
    }

    /// Take every event raised since the last call.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // ==========================================================================
    // Outbound queue
    // ==========================================================================

    #[must_use]
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Take at most `cap` bytes of queued output.
    pub fn next_batch(&mut self, cap: usize) -> Vec<Bytes> {
        self.outbound.next_batch(cap)
    }

    /// Whether the transport should be shut down now.
    ///
    /// True once the close is recorded and everything queued has been
    /// written, except for a client that started a two-way close: it keeps
    /// reading until the server's reply arrives.
    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        if self.state.is_terminal() {
            return true;
        }
        if !self.flushed || !self.outbound.is_empty() {
            return false;
        }
        let awaiting_reply = self.role == Role::Client
            && self.opened
            && self.state == ConnectionState::Closing
            && self.close_type() == CloseHandshakeType::TwoWay
            && self.close.as_ref().is_some_and(|c| !c.remote);
        !awaiting_reply
    }

    fn demand_write(&self) {
        if let Some(demand) = &self.write_demand {
            demand.wants_write();
        }
    }

    fn write_raw(&mut self, bytes: Bytes) {
        self.outbound.push(bytes);
        self.demand_write();
    }

    fn enqueue(&mut self, bytes: Bytes) -> Result<()> {
        self.outbound.push(bytes);
        let queued = self.outbound.len();
        if queued > self.config.max_outbound_queue {
            let err = Error::OutboundQueueFull {
                size: queued,
                max: self.config.max_outbound_queue,
            };
            warn!(remote = ?self.remote_addr, queued, "Dropping slow consumer");
            self.events.push(Event::Error(err.clone()));
            self.outbound.clear();
            self.state = ConnectionState::Closing;
            self.flush_and_close(CloseCode::Abnormal, "outbound queue full".into(), false);
            return Err(err);
        }
        self.demand_write();
        Ok(())
    }

    // ==========================================================================
    // Inbound
    // ==========================================================================

    /// Feed bytes read from the transport.
    pub fn decode(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        trace!(len = data.len(), state = %self.state, "decode");
        match self.state {
            ConnectionState::Connecting if !self.flushed => self.decode_handshake(data),
            ConnectionState::Open => self.decode_frames(data),
            ConnectionState::Closing if self.close_type() == CloseHandshakeType::TwoWay => {
                self.decode_frames(data);
            }
            _ => {}
        }
    }

    fn close_type(&self) -> CloseHandshakeType {
        self.draft
            .as_ref()
            .map_or(CloseHandshakeType::None, Draft::close_handshake_type)
    }

    fn decode_handshake(&mut self, data: &[u8]) {
        self.handshake_buf.extend_from_slice(data);
        if let Err(e) = self
            .config
            .limits
            .check_handshake_size(self.handshake_buf.len())
        {
            warn!(remote = ?self.remote_addr, error = %e, "Handshake too large");
            self.reject_handshake(&e);
            return;
        }
        let buf = std::mem::take(&mut self.handshake_buf);
        match self.role {
            Role::Server => self.server_handshake(buf),
            Role::Client => self.client_handshake(buf),
        }
    }

    fn server_handshake(&mut self, mut buf: BytesMut) {
        if buf.len() < FLASH_POLICY_REQUEST.len() && FLASH_POLICY_REQUEST.starts_with(&buf) {
            self.handshake_buf = buf;
            return;
        }
        if buf[..] == *FLASH_POLICY_REQUEST {
            match self.hooks.flash_policy(self.local_addr) {
                Ok(policy) => {
                    debug!(remote = ?self.remote_addr, "Serving flash policy");
                    self.write_raw(Bytes::from(policy));
                    self.close_with(CloseCode::FlashPolicy, String::new(), true);
                }
                Err(e) => self.reject_handshake(&e),
            }
            return;
        }

        let mut last_error = None;
        for index in 0..self.drafts.len() {
            let mut draft = self.drafts[index].copy_instance();
            draft.configure(Role::Server, &self.config);

            let (request, used) = match draft.translate_request(&buf) {
                Ok(parsed) => parsed,
                Err(e) if e.is_incomplete() => {
                    self.handshake_buf = buf;
                    return;
                }
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            if draft.accept_as_server(&request) != HandshakeState::Matched {
                trace!(draft = draft.name(), "Draft does not match");
                continue;
            }

            if let Some(allowed) = &self.config.allowed_origins {
                if let Err(e) = validate_origin(request.headers.get("Origin"), allowed) {
                    warn!(remote = ?self.remote_addr, error = %e, "Rejected origin");
                    self.reject_handshake(&e);
                    return;
                }
            }

            let mut response = ServerHandshake::default();
            if let Err(e) = self.hooks.on_handshake_as_server(&request, &mut response) {
                self.reject_by_application(e);
                return;
            }
            if let Err(e) = draft.post_process_response_as_server(&request, &mut response) {
                self.reject_handshake(&e);
                return;
            }
            let mut out = BytesMut::new();
            if let Err(e) = response.write(&mut out) {
                self.reject_handshake(&e);
                return;
            }
            self.write_raw(out.freeze());

            debug!(
                remote = ?self.remote_addr,
                draft = draft.name(),
                resource = %request.resource,
                "Accepted handshake"
            );
            self.draft = Some(draft);
            let leftover = buf.split_off(used);
            self.open(request, response);
            if !leftover.is_empty() {
                self.decode_frames(&leftover);
            }
            return;
        }

        let err = last_error
            .unwrap_or_else(|| Error::InvalidHandshake("no draft matches".into()));
        debug!(remote = ?self.remote_addr, error = %err, "No draft matches handshake");
        self.reject_handshake(&err);
    }

    /// Answer 404 and close with the error's code.
    fn reject_handshake(&mut self, err: &Error) {
        self.write_raw(http_error_response(404));
        self.flush_and_close(err.close_code(), err.to_string(), false);
    }

    fn reject_by_application(&mut self, err: Error) {
        if let Error::HandshakeRejected { status: 500, .. } = err {
            warn!(remote = ?self.remote_addr, error = %err, "Handshake hook failed");
            self.events.push(Event::Error(err.clone()));
            self.write_raw(http_error_response(500));
            self.flush_and_close(CloseCode::NeverConnected, err.to_string(), false);
        } else {
            debug!(remote = ?self.remote_addr, error = %err, "Handshake rejected by application");
            self.reject_handshake(&err);
        }
    }

    fn client_handshake(&mut self, mut buf: BytesMut) {
        let (Some(draft), Some(request)) = (self.draft.as_mut(), self.request.as_ref()) else {
            self.internal_error("client handshake data before a request was sent");
            return;
        };
        let (response, used) = match draft.translate_response(&buf) {
            Ok(parsed) => parsed,
            Err(e) if e.is_incomplete() => {
                self.handshake_buf = buf;
                return;
            }
            Err(e) => {
                warn!(remote = ?self.remote_addr, error = %e, "Malformed handshake response");
                self.close_with(CloseCode::ProtocolError, e.to_string(), false);
                return;
            }
        };
        match draft.accept_as_client(request, &response) {
            HandshakeState::Matched => {}
            HandshakeState::Matching => {
                self.handshake_buf = buf;
                return;
            }
            HandshakeState::NotMatched => {
                let reason = format!("draft {} refuses handshake", draft.name());
                warn!(remote = ?self.remote_addr, "{reason}");
                self.close_with(CloseCode::ProtocolError, reason, false);
                return;
            }
        }

        let request = request.clone();
        if let Err(e) = self.hooks.on_handshake_as_client(&request, &response) {
            debug!(error = %e, "Handshake rejected by application");
            self.events.push(Event::Error(e.clone()));
            self.flush_and_close(e.close_code(), e.to_string(), false);
            return;
        }
        let leftover = buf.split_off(used);
        self.open(request, response);
        if !leftover.is_empty() {
            self.decode_frames(&leftover);
        }
    }

    fn open(&mut self, request: ClientHandshake, response: ServerHandshake) {
        self.state = ConnectionState::Open;
        self.opened = true;
        self.last_pong = Instant::now();
        self.handshake_buf = BytesMut::new();
        debug!(
            role = %self.role,
            remote = ?self.remote_addr,
            draft = self.draft.as_ref().map_or("", Draft::name),
            "Connection open"
        );
        self.events.push(Event::Open { request, response });
    }

    fn decode_frames(&mut self, data: &[u8]) {
        let Some(draft) = self.draft.as_mut() else {
            return;
        };
        let mut frames = Vec::new();
        let result = draft.decode(data, &mut frames);
        for frame in frames {
            if self.state.is_terminal() {
                return;
            }
            self.process_frame(frame);
        }
        if let Err(e) = result {
            warn!(remote = ?self.remote_addr, error = %e, "Invalid frame");
            self.fail(e);
        }
    }

    /// Report `err` and close with its code.
    fn fail(&mut self, err: Error) {
        let code = err.close_code();
        let reason = truncate_reason(err.to_string());
        self.events.push(Event::Error(err));
        if self.state == ConnectionState::Closing {
            self.close_connection(code, reason, false);
        } else {
            self.close_with(code, reason, false);
        }
    }

    fn internal_error(&mut self, what: &str) {
        tracing::error!(remote = ?self.remote_addr, "{what}");
        self.fail(Error::Internal(what.to_string()));
    }

    fn process_frame(&mut self, frame: Frame) {
        trace!(opcode = %frame.opcode, fin = frame.fin, len = frame.payload().len(), "frame");
        match frame.opcode {
            OpCode::Close => {
                let status = match CloseFrame::from_payload(frame.payload()) {
                    Ok(status) => status,
                    Err(e) => return self.fail(e),
                };
                if self.state == ConnectionState::Closing {
                    self.close_connection(status.code, status.reason, true);
                } else if self.close_type() == CloseHandshakeType::TwoWay {
                    self.close_with(status.code, status.reason, true);
                } else {
                    self.flush_and_close(status.code, status.reason, false);
                }
            }
            OpCode::Ping => {
                if self.state != ConnectionState::Open {
                    return;
                }
                let payload = frame.into_payload();
                self.events.push(Event::Ping(payload.clone()));
                if let Err(e) = self.write_frame(Frame::pong(payload)) {
                    debug!(error = %e, "Could not answer ping");
                }
            }
            OpCode::Pong => {
                self.last_pong = Instant::now();
                self.events.push(Event::Pong(frame.into_payload()));
            }
            _ => {
                if self.state != ConnectionState::Open {
                    return;
                }
                match self.assembler.push(frame) {
                    Ok(Some(assembled)) => match assembled.into_message() {
                        Ok(message) => self.events.push(Event::Message(message)),
                        Err(e) => self.fail(e),
                    },
                    Ok(None) => {}
                    Err(e) => self.fail(e),
                }
            }
        }
    }

    // ==========================================================================
    // Outbound
    // ==========================================================================

    /// Client only: finish `request` with the draft's headers and queue it.
    ///
    /// # Errors
    ///
    /// `Error::Internal` on a server connection, or whatever the draft
    /// reports while filling in keys.
    pub fn start_handshake(&mut self, mut request: ClientHandshake) -> Result<()> {
        if self.role != Role::Client || self.request.is_some() {
            return Err(Error::Internal("handshake already started".into()));
        }
        if self.config.origin_from_host && !request.headers.contains("Origin") {
            let host = request.field("Host").to_string();
            request.headers.set("Origin", host);
        }
        let draft = self
            .draft
            .as_mut()
            .ok_or_else(|| Error::Internal("client without a draft".into()))?;
        draft.post_process_request_as_client(&mut request)?;

        let mut out = BytesMut::new();
        request.write(&mut out)?;
        debug!(draft = draft.name(), resource = %request.resource, "Sending handshake");
        self.request = Some(request);
        self.write_raw(out.freeze());
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.state == ConnectionState::Open {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let draft = self.draft.as_mut().ok_or(Error::NotConnected)?;
        let mut out = BytesMut::with_capacity(frame.wire_size(self.role.must_mask()));
        draft.encode(frame, &mut out)?;
        self.enqueue(out.freeze())
    }

    /// Queue a whole message, split by `fragment_size` where the draft
    /// allows fragments.
    fn send_message(&mut self, opcode: OpCode, payload: Bytes) -> Result<()> {
        self.check_open()?;
        if self.streaming.is_some() {
            return Err(Error::ProtocolViolation(
                "a streamed message is still open".into(),
            ));
        }
        let fragments = self
            .draft
            .as_ref()
            .is_some_and(Draft::supports_fragmentation);
        if fragments {
            let fragmenter = MessageFragmenter::new(payload, opcode, self.config.fragment_size);
            for frame in fragmenter {
                self.write_frame(frame)?;
            }
            Ok(())
        } else {
            self.write_frame(Frame::new(true, opcode, payload))
        }
    }

    /// Queue a text message.
    ///
    /// # Errors
    ///
    /// `Error::NotConnected` unless open, or an encode failure.
    pub fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send_message(OpCode::Text, Bytes::from(text.into()))
    }

    /// Queue a binary message.
    ///
    /// # Errors
    ///
    /// `Error::NotConnected` unless open, `Error::Unsupported` on drafts
    /// without binary frames.
    pub fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.send_message(OpCode::Binary, data.into())
    }

    /// Queue any application message. `Close` starts the close handshake.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Text(text) => self.send_text(text),
            Message::Binary(data) => self.send_binary(data),
            Message::Ping(data) => self.send_ping(data),
            Message::Pong(data) => {
                self.check_open()?;
                self.write_frame(Frame::pong(data))
            }
            Message::Close(status) => {
                let status = status.unwrap_or_else(|| CloseFrame::new(CloseCode::Normal, ""));
                self.close(status.code, status.reason);
                Ok(())
            }
        }
    }

    /// Queue one fragment of a message streamed by the caller.
    ///
    /// The first call fixes the message type; later calls become
    /// continuation frames until one with `fin` set.
    ///
    /// # Errors
    ///
    /// `Error::ProtocolViolation` for a non-data opcode or for starting a
    /// message of another type while one is open.
    pub fn send_fragment(&mut self, opcode: OpCode, payload: impl Into<Bytes>, fin: bool) -> Result<()> {
        self.check_open()?;
        if opcode != OpCode::Text && opcode != OpCode::Binary {
            return Err(Error::ProtocolViolation(
                "only text or binary messages can be streamed".into(),
            ));
        }
        let wire_opcode = match self.streaming {
            Some(open) if open != opcode => {
                return Err(Error::ProtocolViolation(format!(
                    "cannot start a {opcode} message while a {open} message is open"
                )));
            }
            Some(_) => OpCode::Continuation,
            None => opcode,
        };
        self.write_frame(Frame::new(fin, wire_opcode, payload))?;
        self.streaming = if fin { None } else { Some(opcode) };
        Ok(())
    }

    /// Queue a ping.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` on drafts without ping frames,
    /// `Error::ControlFrameTooLarge` beyond 125 bytes.
    pub fn send_ping(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        self.check_open()?;
        let payload = payload.into();
        let draft = self.draft.as_ref().ok_or(Error::NotConnected)?;
        if !draft.supports_ping() {
            return Err(Error::Unsupported {
                draft: draft.name(),
                operation: "ping",
            });
        }
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        self.write_frame(Frame::ping(payload))
    }

    // ==========================================================================
    // Closing
    // ==========================================================================

    /// Start closing with `code`.
    pub fn close(&mut self, code: CloseCode, reason: impl Into<String>) {
        self.close_with(code, reason.into(), false);
    }

    fn close_with(&mut self, code: CloseCode, reason: String, remote: bool) {
        if matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::NeverConnected
        ) {
            return;
        }
        if self.state == ConnectionState::Open {
            if code == CloseCode::Abnormal || code.is_sentinel() {
                self.state = ConnectionState::Closing;
                self.flush_and_close(code, reason, false);
                return;
            }
            if self.close_type() != CloseHandshakeType::None {
                if !remote {
                    self.events.push(Event::CloseInitiated {
                        code,
                        reason: reason.clone(),
                    });
                }
                let frame = Frame::close(&CloseFrame::new(code, reason.clone()));
                if let Err(e) = frame.and_then(|frame| self.write_frame(frame)) {
                    warn!(code = %code, error = %e, "Could not send close frame");
                    self.events.push(Event::Error(e));
                    self.flush_and_close(
                        CloseCode::Abnormal,
                        "generated frame is invalid".into(),
                        false,
                    );
                }
            }
            self.flush_and_close(code, reason, remote);
        } else if code == CloseCode::FlashPolicy {
            self.flush_and_close(CloseCode::FlashPolicy, reason, true);
        } else if code == CloseCode::ProtocolError {
            self.flush_and_close(code, reason, remote);
        } else {
            self.flush_and_close(CloseCode::NeverConnected, reason, false);
        }
        self.state = ConnectionState::Closing;
        self.handshake_buf = BytesMut::new();
    }

    /// Record the close and stop reading. Runs once.
    fn flush_and_close(&mut self, code: CloseCode, reason: String, remote: bool) {
        if self.flushed {
            return;
        }
        debug!(code = %code, reason = %reason, remote, "Flushing before close");
        self.flushed = true;
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
        }
        self.close = Some(CloseRecord {
            code,
            reason: reason.clone(),
            remote,
        });
        self.demand_write();
        self.events.push(Event::Closing {
            code,
            reason,
            remote,
        });
    }

    /// The final transition. Runs once.
    fn close_connection(&mut self, code: CloseCode, reason: String, remote: bool) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(draft) = self.draft.as_mut() {
            draft.reset();
        }
        self.assembler.reset();
        self.outbound.clear();
        self.handshake_buf = BytesMut::new();
        self.state = if code == CloseCode::NeverConnected && !self.opened {
            ConnectionState::NeverConnected
        } else {
            ConnectionState::Closed
        };
        debug!(code = %code, remote, state = %self.state, "Connection closed");
        self.events.push(Event::Close {
            code,
            reason,
            remote,
        });
    }

    /// Finish after the queued output was written, using the recorded close.
    pub fn finish(&mut self) {
        match self.close.clone() {
            Some(record) => self.close_connection(record.code, record.reason, record.remote),
            None => self.eot(),
        }
    }

    /// The transport ended.
    pub fn eot(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.close_connection(CloseCode::NeverConnected, String::new(), true);
        } else if let Some(record) = self.close.clone() {
            self.close_connection(record.code, record.reason, record.remote);
        } else {
            let code = match self.close_type() {
                CloseHandshakeType::None => CloseCode::Normal,
                CloseHandshakeType::OneWay if self.role == Role::Client => CloseCode::Normal,
                _ => CloseCode::Abnormal,
            };
            self.close_connection(code, String::new(), true);
        }
    }

    /// Transport failed with `err`.
    pub fn transport_error(&mut self, err: Error) {
        if self.state.is_terminal() {
            return;
        }
        warn!(remote = ?self.remote_addr, error = %err, "Transport error");
        self.events.push(Event::Error(err));
        self.eot();
    }

    /// Lost-connection check: close if no pong arrived within `deadline`,
    /// otherwise ping.
    pub fn check_alive(&mut self, now: Instant, deadline: Duration) {
        if self.state != ConnectionState::Open
            || !self.draft.as_ref().is_some_and(Draft::supports_ping)
        {
            return;
        }
        if now.saturating_duration_since(self.last_pong) > deadline {
            debug!(remote = ?self.remote_addr, "No pong within deadline");
            self.close_connection(
                CloseCode::Abnormal,
                "the other endpoint did not respond with a pong in time".into(),
                false,
            );
        } else if let Err(e) = self.send_ping(Bytes::new()) {
            trace!(error = %e, "Lost-connection ping not sent");
        }
    }
}

/// Cut `reason` to fit a close frame.
fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
