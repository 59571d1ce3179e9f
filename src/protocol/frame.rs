//! WebSocket frame model and wire layout (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Masking key (if MASK set)                 |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::CloseFrame;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

const FIN: u8 = 0x80;
const RSV1: u8 = 0x40;
const RSV2: u8 = 0x20;
const RSV3: u8 = 0x10;
const MASK: u8 = 0x80;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bits as they appear in the first byte (`0x70` mask).
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, if the MASK bit was set.
    pub mask: Option<[u8; 4]>,
    /// Announced payload length.
    pub payload_len: usize,
    /// Bytes taken by the header including extended length and key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` naming how many more bytes the header needs
    /// - `Error::ReservedOpcode` / `Error::InvalidOpcode`
    /// - `Error::ControlFrameTooLarge` as soon as a control frame announces
    ///   more than 125 bytes, before any payload is buffered
    /// - `Error::PayloadTooLargeForPlatform` if the 64-bit length does not fit
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & MASK != 0;
        let len7 = byte1 & 0x7F;

        if opcode.is_control() && usize::from(len7) > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(usize::from(len7)));
        }

        let (payload_len, len_size) = match len7 {
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 2)
            }
            127 => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                let len = usize::try_from(len).map_err(|_| Error::PayloadTooLargeForPlatform {
                    size: len,
                    max: usize::MAX as u64,
                })?;
                (len, 8)
            }
            short => (usize::from(short), 0),
        };

        let key_offset = 2 + len_size;
        let header_len = if masked { key_offset + 4 } else { key_offset };
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let mask = masked.then(|| {
            [
                buf[key_offset],
                buf[key_offset + 1],
                buf[key_offset + 2],
                buf[key_offset + 3],
            ]
        });

        Ok(Self {
            fin: byte0 & FIN != 0,
            rsv: byte0 & (RSV1 | RSV2 | RSV3),
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }

    /// Header plus payload length, guarding against overflow.
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLargeForPlatform` on overflow.
    pub fn frame_len(&self) -> Result<usize> {
        self.header_len
            .checked_add(self.payload_len)
            .ok_or(Error::PayloadTooLargeForPlatform {
                size: self.payload_len as u64,
                max: (usize::MAX - self.header_len) as u64,
            })
    }
}

/// One WebSocket frame.
///
/// Constructed by a codec on decode or by the sender on encode; never
/// mutated after it has been handed on, except by the extension pipeline
/// which rewrites payload and reserved bits in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bit 1. Set by per-message compression.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    payload: Bytes,
}

impl Frame {
    /// Create a new frame with clear reserved bits.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Create a continuation frame.
    #[must_use]
    pub fn continuation(fin: bool, data: impl Into<Bytes>) -> Self {
        Self::new(fin, OpCode::Continuation, data)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Create a close frame.
    ///
    /// # Errors
    ///
    /// Fails when the status cannot legally appear on the wire, see
    /// [`CloseFrame::to_payload`].
    pub fn close(status: &CloseFrame) -> Result<Self> {
        Ok(Self::new(true, OpCode::Close, status.to_payload()?))
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Reserved bits in first-byte position (`0x70` mask).
    #[must_use]
    pub const fn rsv_bits(&self) -> u8 {
        (if self.rsv1 { RSV1 } else { 0 })
            | (if self.rsv2 { RSV2 } else { 0 })
            | (if self.rsv3 { RSV3 } else { 0 })
    }

    fn from_header(header: &FrameHeader, payload: Bytes) -> Self {
        Self {
            fin: header.fin,
            rsv1: header.rsv & RSV1 != 0,
            rsv2: header.rsv & RSV2 != 0,
            rsv3: header.rsv & RSV3 != 0,
            opcode: header.opcode,
            masked: header.mask.is_some(),
            payload,
        }
    }

    /// Parse one complete frame from `buf`, unmasking the payload.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - any header error from [`FrameHeader::parse`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len()?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = BytesMut::from(&buf[header.header_len..total]);
        if let Some(key) = header.mask {
            apply_mask_fast(&mut payload, key);
        }
        Ok((Self::from_header(&header, payload.freeze()), total))
    }

    /// Build a frame from an already split-off header and masked payload.
    pub(crate) fn from_parts(header: &FrameHeader, mut payload: BytesMut) -> Self {
        if let Some(key) = header.mask {
            apply_mask_fast(&mut payload, key);
        }
        Self::from_header(header, payload.freeze())
    }

    /// Validate control frame rules.
    ///
    /// Reserved bits are checked by the extension pipeline, which is the
    /// only party that knows which bits were negotiated.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if control frame payload > 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Append the wire form of this frame to `out`.
    ///
    /// A `Some` key sets the MASK bit and masks the payload copy; the frame
    /// itself is left untouched.
    pub fn encode(&self, out: &mut BytesMut, mask: Option<[u8; 4]>) {
        let len = self.payload.len();
        out.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8() | self.rsv_bits();
        if self.fin {
            byte0 |= FIN;
        }
        out.put_u8(byte0);

        let mask_bit = if mask.is_some() { MASK } else { 0 };
        if len <= MAX_CONTROL_FRAME_PAYLOAD {
            out.put_u8(mask_bit | len as u8);
        } else if let Ok(len16) = u16::try_from(len) {
            out.put_u8(mask_bit | 126);
            out.put_u16(len16);
        } else {
            out.put_u8(mask_bit | 127);
            out.put_u64(len as u64);
        }

        match mask {
            Some(key) => {
                out.put_slice(&key);
                let start = out.len();
                out.put_slice(&self.payload);
                apply_mask_fast(&mut out[start..], key);
            }
            None => out.put_slice(&self.payload),
        }
    }

    /// Encode into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self, mask: Option<[u8; 4]>) -> Bytes {
        let mut out = BytesMut::with_capacity(self.wire_size(mask.is_some()));
        self.encode(&mut out, mask);
        out.freeze()
    }

    /// Calculate the size needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let extended = if len <= MAX_CONTROL_FRAME_PAYLOAD {
            0
        } else if len <= usize::from(u16::MAX) {
            2
        } else {
            8
        };
        2 + extended + if masked { 4 } else { 0 } + len
    }
}
