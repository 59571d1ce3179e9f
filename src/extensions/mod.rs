//! WebSocket Extension Framework (RFC 6455 Section 9).
//!
//! An extension transforms data frames after they are unmasked on the way in
//! and before they are masked on the way out. Exactly one extension is bound
//! to a connection; when nothing else is negotiated it is the
//! [`IdentityExtension`], which only polices the reserved bits.
//!
//! Extensions carry per-connection state (compression dictionaries). The
//! instances a draft is configured with are templates: the negotiator calls
//! [`Extension::copy_instance`] for every connection and binds the copy.
//!
//! # Example
//!
//! ```rust,ignore
//! use wsengine::extensions::{Extension, IdentityExtension};
//!
//! let template = IdentityExtension;
//! let mut bound = template.copy_instance();
//! assert!(bound.accept_offer("x-unknown; foo=1"));
//! ```

#[cfg(feature = "compression")]
pub mod deflate;

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Represents a single extension parameter.
///
/// Extension parameters follow the format: `name; param1=value1; param2`
/// For example: `permessage-deflate; client_max_window_bits=15; server_no_context_takeover`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name (e.g., "client_max_window_bits").
    pub name: String,
    /// Optional parameter value. None for boolean parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// Create a new parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a boolean/flag parameter (no value).
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse a single parameter from a string (e.g., "param=value" or "param").
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some((name, value)) = s.split_once('=') {
            Self {
                name: name.trim().to_string(),
                value: Some(value.trim().trim_matches('"').to_string()),
            }
        } else {
            Self::flag(s)
        }
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Parsed extension offer/response from Sec-WebSocket-Extensions header.
///
/// Represents a single extension with its name and parameters.
/// For example: `permessage-deflate; client_max_window_bits=15`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name (e.g., "permessage-deflate").
    pub name: String,
    /// Extension parameters.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Create a new extension offer with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create a new extension offer with parameters.
    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a single extension offer from a string.
    ///
    /// Format: `extension-name; param1=value1; param2`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the extension string or name is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts
            .next()
            .ok_or_else(|| Error::InvalidExtension("Empty extension string".into()))?
            .trim()
            .to_string();

        if name.is_empty() {
            return Err(Error::InvalidExtension("Empty extension name".into()));
        }

        let params = parts
            .map(ExtensionParam::parse)
            .filter(|p| !p.name.is_empty())
            .collect();

        Ok(Self { name, params })
    }

    /// Parse multiple extension offers from a Sec-WebSocket-Extensions header value.
    ///
    /// Extensions are comma-separated, parameters are semicolon-separated.
    /// Empty list elements are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if any extension offer in the header is invalid.
    pub fn parse_header(header: &str) -> Result<Vec<Self>> {
        header
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Get a parameter value by name.
    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check if a boolean parameter is present.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}

/// RSV bit usage declaration for extensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvBits {
    /// Extension uses RSV1 bit (e.g., permessage-deflate).
    pub rsv1: bool,
    /// Extension uses RSV2 bit.
    pub rsv2: bool,
    /// Extension uses RSV3 bit.
    pub rsv3: bool,
}

impl RsvBits {
    /// No RSV bits used.
    pub const NONE: Self = Self {
        rsv1: false,
        rsv2: false,
        rsv3: false,
    };

    /// RSV1 only (used by permessage-deflate).
    pub const RSV1: Self = Self {
        rsv1: true,
        rsv2: false,
        rsv3: false,
    };

    /// Bits in first-byte position, comparable with [`Frame::rsv_bits`].
    pub const fn mask(&self) -> u8 {
        (if self.rsv1 { 0x40 } else { 0 })
            | (if self.rsv2 { 0x20 } else { 0 })
            | (if self.rsv3 { 0x10 } else { 0 })
    }

    /// Check if any bits conflict with another RsvBits declaration.
    pub fn conflicts_with(&self, other: &RsvBits) -> bool {
        self.mask() & other.mask() != 0
    }
}

/// A frame payload transform negotiated during the opening handshake.
///
/// Implementations are bound to exactly one connection and driven from that
/// connection's decode/encode path only. Configured templates live in the
/// server's shared draft list, so they must also be `Sync`.
pub trait Extension: Send + Sync + fmt::Debug {
    /// Token used in the `Sec-WebSocket-Extensions` header. Empty for the
    /// identity extension.
    fn name(&self) -> &str;

    /// Reserved bits this extension may set.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Reject frames that carry reserved bits this extension does not own.
    ///
    /// Control frames may never carry reserved bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedBitsSet`].
    fn is_frame_valid(&self, frame: &Frame) -> Result<()> {
        let allowed = if frame.opcode.is_control() {
            0
        } else {
            self.rsv_bits().mask()
        };
        if frame.rsv_bits() & !allowed != 0 {
            return Err(Error::ReservedBitsSet);
        }
        Ok(())
    }

    /// Transform an inbound frame in place. Called after unmasking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the payload cannot be transformed.
    fn decode_frame(&mut self, frame: &mut Frame) -> Result<()>;

    /// Transform an outbound frame in place. Called before masking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the payload cannot be transformed.
    fn encode_frame(&mut self, frame: &mut Frame) -> Result<()>;

    /// Server side: accept the client's `Sec-WebSocket-Extensions` value.
    fn accept_offer(&mut self, header: &str) -> bool;

    /// Client side: accept the server's `Sec-WebSocket-Extensions` value.
    fn accept_response(&mut self, header: &str) -> bool;

    /// Header value a client sends, `None` if nothing is offered.
    fn client_offer(&self) -> Option<String>;

    /// Header value a server answers with after accepting, `None` for no header.
    fn server_response(&self) -> Option<String>;

    /// Fresh instance with the same configuration and no negotiated state.
    fn copy_instance(&self) -> Box<dyn Extension>;

    /// Release per-connection state.
    fn reset(&mut self) {}
}

impl Clone for Box<dyn Extension> {
    fn clone(&self) -> Self {
        self.copy_instance()
    }
}

/// The extension bound when nothing else is negotiated.
///
/// Passes payloads through and rejects every reserved bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityExtension;

impl Extension for IdentityExtension {
    fn name(&self) -> &str {
        ""
    }

    fn decode_frame(&mut self, _frame: &mut Frame) -> Result<()> {
        Ok(())
    }

    fn encode_frame(&mut self, _frame: &mut Frame) -> Result<()> {
        Ok(())
    }

    fn accept_offer(&mut self, _header: &str) -> bool {
        true
    }

    fn accept_response(&mut self, header: &str) -> bool {
        header.trim().is_empty()
    }

    fn client_offer(&self) -> Option<String> {
        None
    }

    fn server_response(&self) -> Option<String> {
        None
    }

    fn copy_instance(&self) -> Box<dyn Extension> {
        Box::new(IdentityExtension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    // ==========================================================================
    // ExtensionParam Tests
    // ==========================================================================

    #[test]
    fn test_extension_param_new() {
        let param = ExtensionParam::new("client_max_window_bits", "15");
        assert_eq!(param.name, "client_max_window_bits");
        assert_eq!(param.value, Some("15".to_string()));
    }

    #[test]
    fn test_extension_param_parse_with_value() {
        let param = ExtensionParam::parse("client_max_window_bits=15");
        assert_eq!(param.name, "client_max_window_bits");
        assert_eq!(param.value, Some("15".to_string()));
    }

    #[test]
    fn test_extension_param_parse_flag() {
        let param = ExtensionParam::parse(" server_no_context_takeover ");
        assert_eq!(param.name, "server_no_context_takeover");
        assert_eq!(param.value, None);
    }

    #[test]
    fn test_extension_param_parse_quoted_value() {
        let param = ExtensionParam::parse("param=\"quoted value\"");
        assert_eq!(param.value, Some("quoted value".to_string()));
    }

    #[test]
    fn test_extension_param_display() {
        assert_eq!(ExtensionParam::new("bits", "15").to_string(), "bits=15");
        assert_eq!(ExtensionParam::flag("no_context").to_string(), "no_context");
    }

    // ==========================================================================
    // ExtensionOffer Tests
    // ==========================================================================

    #[test]
    fn test_extension_offer_parse_with_params() {
        let offer = ExtensionOffer::parse(
            "permessage-deflate; client_max_window_bits=15; server_no_context_takeover",
        )
        .unwrap();
        assert_eq!(offer.name, "permessage-deflate");
        assert_eq!(offer.params.len(), 2);
        assert_eq!(offer.params[0].name, "client_max_window_bits");
        assert_eq!(offer.params[1].value, None);
    }

    #[test]
    fn test_extension_offer_parse_header() {
        let offers = ExtensionOffer::parse_header(
            "permessage-deflate; client_max_window_bits, , x-webkit-deflate-frame",
        )
        .unwrap();
        assert_eq!(offers.len(), 2);
        assert!(offers[0].is_named("PERMESSAGE-DEFLATE"));
        assert_eq!(offers[1].name, "x-webkit-deflate-frame");
        assert!(ExtensionOffer::parse_header("").unwrap().is_empty());
    }

    #[test]
    fn test_extension_offer_get_param() {
        let offer = ExtensionOffer::parse("ext; param1=value1; param2").unwrap();
        let param = offer.get_param("param1").unwrap();
        assert_eq!(param.value, Some("value1".to_string()));
        assert!(offer.has_param("param2"));
        assert!(!offer.has_param("param3"));
    }

    #[test]
    fn test_extension_offer_display() {
        let offer = ExtensionOffer::with_params(
            "permessage-deflate",
            vec![
                ExtensionParam::new("client_max_window_bits", "15"),
                ExtensionParam::flag("server_no_context_takeover"),
            ],
        );
        assert_eq!(
            offer.to_string(),
            "permessage-deflate; client_max_window_bits=15; server_no_context_takeover"
        );
    }

    #[test]
    fn test_extension_offer_parse_empty_name_error() {
        assert!(ExtensionOffer::parse("").is_err());
        assert!(ExtensionOffer::parse(" ; a=1").is_err());
    }

    // ==========================================================================
    // RsvBits Tests
    // ==========================================================================

    #[test]
    fn test_rsv_bits_mask() {
        assert_eq!(RsvBits::NONE.mask(), 0);
        assert_eq!(RsvBits::RSV1.mask(), 0x40);
        assert!(RsvBits::RSV1.conflicts_with(&RsvBits::RSV1));
        assert!(!RsvBits::RSV1.conflicts_with(&RsvBits::NONE));
    }

    // ==========================================================================
    // IdentityExtension Tests
    // ==========================================================================

    #[test]
    fn test_identity_rejects_reserved_bits() {
        let ext = IdentityExtension;
        assert!(ext.is_frame_valid(&Frame::text("ok")).is_ok());

        for bit in [0x40u8, 0x20, 0x10] {
            let mut frame = Frame::binary("x");
            frame.rsv1 = bit == 0x40;
            frame.rsv2 = bit == 0x20;
            frame.rsv3 = bit == 0x10;
            assert_eq!(ext.is_frame_valid(&frame), Err(Error::ReservedBitsSet));
        }
    }

    #[test]
    fn test_identity_passes_payload_through() {
        let mut ext = IdentityExtension;
        let mut frame = Frame::new(false, OpCode::Text, "abc");
        ext.encode_frame(&mut frame).unwrap();
        ext.decode_frame(&mut frame).unwrap();
        assert_eq!(frame.payload(), b"abc");
        assert!(!frame.fin);
    }

    #[test]
    fn test_identity_negotiation() {
        let mut ext = IdentityExtension;
        assert!(ext.accept_offer("permessage-deflate"));
        assert!(ext.accept_offer(""));
        assert!(ext.accept_response(""));
        assert!(!ext.accept_response("permessage-deflate"));
        assert_eq!(ext.client_offer(), None);
        assert_eq!(ext.server_response(), None);
    }

    #[derive(Debug, Default)]
    struct Rsv2Marker {
        seen: usize,
    }

    impl Extension for Rsv2Marker {
        fn name(&self) -> &str {
            "x-marker"
        }
        fn rsv_bits(&self) -> RsvBits {
            RsvBits {
                rsv2: true,
                ..RsvBits::NONE
            }
        }
        fn decode_frame(&mut self, frame: &mut Frame) -> Result<()> {
            self.seen += 1;
            frame.rsv2 = false;
            Ok(())
        }
        fn encode_frame(&mut self, frame: &mut Frame) -> Result<()> {
            frame.rsv2 = !frame.opcode.is_control();
            Ok(())
        }
        fn accept_offer(&mut self, header: &str) -> bool {
            header.contains("x-marker")
        }
        fn accept_response(&mut self, header: &str) -> bool {
            header.contains("x-marker")
        }
        fn client_offer(&self) -> Option<String> {
            Some("x-marker".into())
        }
        fn server_response(&self) -> Option<String> {
            Some("x-marker".into())
        }
        fn copy_instance(&self) -> Box<dyn Extension> {
            Box::new(Rsv2Marker::default())
        }
    }

    #[test]
    fn test_custom_extension_owns_its_bit() {
        let mut ext = Rsv2Marker::default();
        let mut frame = Frame::binary("x");
        ext.encode_frame(&mut frame).unwrap();
        assert!(ext.is_frame_valid(&frame).is_ok());

        let mut ping = Frame::ping("");
        ping.rsv2 = true;
        assert_eq!(ext.is_frame_valid(&ping), Err(Error::ReservedBitsSet));

        frame.rsv1 = true;
        assert_eq!(ext.is_frame_valid(&frame), Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_copy_instance_drops_state() {
        let mut ext = Rsv2Marker::default();
        ext.decode_frame(&mut Frame::binary("x")).unwrap();
        assert_eq!(ext.seen, 1);
        let boxed: Box<dyn Extension> = Box::new(ext);
        let copy = boxed.clone();
        assert_eq!(format!("{copy:?}"), "Rsv2Marker { seen: 0 }");
    }
}
