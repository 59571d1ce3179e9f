//! Permessage-deflate WebSocket compression extension (RFC 7692).
//!
//! Payloads are run through one raw deflate stream per direction. Every
//! fragment is sync-flushed, so a fragment boundary never splits a deflate
//! block, and the trailing `00 00 FF FF` of the final fragment is left off
//! the wire and restored before inflating.

use std::fmt;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::{Extension, ExtensionOffer, RsvBits};
use crate::protocol::{Frame, OpCode};

/// Registered extension token.
pub const EXTENSION_NAME: &str = "permessage-deflate";

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Settings for [`DeflateExtension`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateConfig {
    /// Reset the server's compressor after every message.
    pub server_no_context_takeover: bool,
    /// Reset the client's compressor after every message.
    pub client_no_context_takeover: bool,
    /// zlib level, 0 to 9.
    pub compression_level: u32,
    /// Messages whose first fragment is smaller than this are sent as is.
    pub threshold: usize,
    /// Largest inflated payload accepted for one frame.
    pub max_fragment_size: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            compression_level: 6,
            threshold: 64,
            max_fragment_size: 16 * 1024 * 1024,
        }
    }
}

impl DeflateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    pub fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    pub fn threshold(mut self, bytes: usize) -> Self {
        self.threshold = bytes;
        self
    }

    pub fn max_fragment_size(mut self, bytes: usize) -> Self {
        self.max_fragment_size = bytes;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for a level above 9.
    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {}",
                level
            )));
        }
        self.compression_level = level;
        Ok(self)
    }
}

/// Stateful permessage-deflate transform for one connection.
pub struct DeflateExtension {
    config: DeflateConfig,
    role: Role,
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    compress: Compress,
    decompress: Decompress,
    deflating: bool,
    inflating: bool,
}

impl DeflateExtension {
    pub fn new(config: DeflateConfig) -> Self {
        let level = Compression::new(config.compression_level);
        Self {
            server_no_context_takeover: config.server_no_context_takeover,
            client_no_context_takeover: config.client_no_context_takeover,
            role: Role::Server,
            compress: Compress::new(level, false),
            decompress: Decompress::new(false),
            deflating: false,
            inflating: false,
            config,
        }
    }

    /// Configuration this instance was created with.
    pub fn config(&self) -> &DeflateConfig {
        &self.config
    }

    fn parse_window_bits(value: &str) -> Option<u8> {
        value
            .parse::<u8>()
            .ok()
            .filter(|bits| (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(bits))
    }

    /// Flags agreed for a client offer, `None` if it cannot be honoured.
    fn negotiate_offer(&self, offer: &ExtensionOffer) -> Option<(bool, bool)> {
        let mut server_nct = self.config.server_no_context_takeover;
        let mut client_nct = self.config.client_no_context_takeover;
        for param in &offer.params {
            match (param.name.as_str(), param.value.as_deref()) {
                (SERVER_NO_CONTEXT_TAKEOVER, None) => server_nct = true,
                (CLIENT_NO_CONTEXT_TAKEOVER, None) => client_nct = true,
                (SERVER_MAX_WINDOW_BITS, Some(v)) => {
                    if Self::parse_window_bits(v)? != MAX_WINDOW_BITS {
                        return None;
                    }
                }
                (CLIENT_MAX_WINDOW_BITS, None) => {}
                (CLIENT_MAX_WINDOW_BITS, Some(v)) => {
                    Self::parse_window_bits(v)?;
                }
                _ => return None,
            }
        }
        Some((server_nct, client_nct))
    }

    /// Flags announced in a server response, `None` if we cannot comply.
    fn negotiate_response(&self, response: &ExtensionOffer) -> Option<(bool, bool)> {
        let mut server_nct = self.config.server_no_context_takeover;
        let mut client_nct = self.config.client_no_context_takeover;
        for param in &response.params {
            match (param.name.as_str(), param.value.as_deref()) {
                (SERVER_NO_CONTEXT_TAKEOVER, None) => server_nct = true,
                (CLIENT_NO_CONTEXT_TAKEOVER, None) => client_nct = true,
                (SERVER_MAX_WINDOW_BITS, Some(v)) => {
                    Self::parse_window_bits(v)?;
                }
                (CLIENT_MAX_WINDOW_BITS, Some(v)) => {
                    if Self::parse_window_bits(v)? != MAX_WINDOW_BITS {
                        return None;
                    }
                }
                _ => return None,
            }
        }
        Some((server_nct, client_nct))
    }

    fn resets_compressor(&self) -> bool {
        match self.role {
            Role::Server => self.server_no_context_takeover,
            Role::Client => self.client_no_context_takeover,
        }
    }

    fn resets_decompressor(&self) -> bool {
        match self.role {
            Role::Server => self.client_no_context_takeover,
            Role::Client => self.server_no_context_takeover,
        }
    }

    fn deflate(&mut self, mut input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            let before = self.compress.total_in();
            self.compress
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("Compression failed: {}", e)))?;
            input = &input[(self.compress.total_in() - before) as usize..];
            // Sync flush is complete once zlib stops short of the buffer end.
            if input.is_empty() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }

    fn inflate(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(1024));
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(input, out, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("Decompression failed: {}", e)))?;
            let read = (self.decompress.total_in() - before_in) as usize;
            let written = self.decompress.total_out() - before_out;
            input = &input[read..];

            if out.len() > self.config.max_fragment_size {
                return Err(Error::FrameTooLarge {
                    size: out.len(),
                    max: self.config.max_fragment_size,
                });
            }
            if status == Status::StreamEnd {
                return Ok(());
            }
            if out.len() < out.capacity() {
                if input.is_empty() {
                    return Ok(());
                }
                if read == 0 && written == 0 {
                    return Err(Error::Extension("Decompression stalled".into()));
                }
            }
        }
    }
}

impl fmt::Debug for DeflateExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeflateExtension")
            .field("role", &self.role)
            .field("server_no_context_takeover", &self.server_no_context_takeover)
            .field("client_no_context_takeover", &self.client_no_context_takeover)
            .field("deflating", &self.deflating)
            .field("inflating", &self.inflating)
            .finish_non_exhaustive()
    }
}

impl Extension for DeflateExtension {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn is_frame_valid(&self, frame: &Frame) -> Result<()> {
        if frame.opcode == OpCode::Continuation && frame.rsv_bits() != 0 {
            return Err(Error::ProtocolViolation(
                "RSV1 bit can only be set for the first frame".into(),
            ));
        }
        let allowed = if frame.opcode.is_control() {
            0
        } else {
            RsvBits::RSV1.mask()
        };
        if frame.rsv_bits() & !allowed != 0 {
            return Err(Error::ReservedBitsSet);
        }
        Ok(())
    }

    fn decode_frame(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.opcode.is_control() {
            return Ok(());
        }
        if frame.opcode != OpCode::Continuation {
            self.inflating = frame.rsv1;
        }
        if !self.inflating {
            return Ok(());
        }

        let mut out = Vec::with_capacity(frame.payload().len().saturating_mul(2) + 64);
        self.inflate(frame.payload(), &mut out)?;
        if frame.fin {
            self.inflate(&DEFLATE_TRAILER, &mut out)?;
            self.inflating = false;
            if self.resets_decompressor() {
                self.decompress.reset(false);
            }
        }

        frame.set_payload(out);
        frame.rsv1 = false;
        Ok(())
    }

    fn encode_frame(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.opcode.is_control() {
            return Ok(());
        }
        if frame.opcode != OpCode::Continuation {
            self.deflating = frame.payload().len() >= self.config.threshold;
            frame.rsv1 = self.deflating;
        }
        if !self.deflating {
            return Ok(());
        }

        let mut out = self.deflate(frame.payload())?;
        if frame.fin {
            if out.ends_with(&DEFLATE_TRAILER) {
                out.truncate(out.len() - DEFLATE_TRAILER.len());
            }
            if out.is_empty() {
                out.push(0x00);
            }
            self.deflating = false;
            if self.resets_compressor() {
                self.compress.reset();
            }
        }

        frame.set_payload(out);
        Ok(())
    }

    fn accept_offer(&mut self, header: &str) -> bool {
        let Ok(offers) = ExtensionOffer::parse_header(header) else {
            return false;
        };
        let agreed = offers
            .iter()
            .filter(|offer| offer.is_named(EXTENSION_NAME))
            .find_map(|offer| self.negotiate_offer(offer));
        match agreed {
            Some((server_nct, client_nct)) => {
                self.role = Role::Server;
                self.server_no_context_takeover = server_nct;
                self.client_no_context_takeover = client_nct;
                true
            }
            None => false,
        }
    }

    fn accept_response(&mut self, header: &str) -> bool {
        let Ok(responses) = ExtensionOffer::parse_header(header) else {
            return false;
        };
        let [response] = responses.as_slice() else {
            return false;
        };
        if !response.is_named(EXTENSION_NAME) {
            return false;
        }
        match self.negotiate_response(response) {
            Some((server_nct, client_nct)) => {
                self.role = Role::Client;
                self.server_no_context_takeover = server_nct;
                self.client_no_context_takeover = client_nct;
                true
            }
            None => false,
        }
    }

    fn client_offer(&self) -> Option<String> {
        let mut offer = format!("{EXTENSION_NAME}; {CLIENT_MAX_WINDOW_BITS}");
        if self.config.server_no_context_takeover {
            offer.push_str("; ");
            offer.push_str(SERVER_NO_CONTEXT_TAKEOVER);
        }
        if self.config.client_no_context_takeover {
            offer.push_str("; ");
            offer.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
        }
        Some(offer)
    }

    fn server_response(&self) -> Option<String> {
        let mut response = EXTENSION_NAME.to_string();
        if self.server_no_context_takeover {
            response.push_str("; ");
            response.push_str(SERVER_NO_CONTEXT_TAKEOVER);
        }
        if self.client_no_context_takeover {
            response.push_str("; ");
            response.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
        }
        Some(response)
    }

    fn copy_instance(&self) -> Box<dyn Extension> {
        Box::new(DeflateExtension::new(self.config.clone()))
    }

    fn reset(&mut self) {
        self.compress.reset();
        self.decompress.reset(false);
        self.deflating = false;
        self.inflating = false;
    }
}
