use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::config::Config;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::Extension;
use crate::protocol::frame::FrameHeader;
use crate::protocol::mask::generate_mask;
use crate::protocol::validation::FrameValidator;
use crate::protocol::Frame;

/// Resumable codec for length-prefixed frames.
///
/// Unconsumed bytes are kept between calls together with the number of
/// bytes the frame at their head still lacks. While that many bytes have
/// not arrived, new input is only appended and the header is not parsed
/// again.
#[derive(Debug)]
pub struct FrameCodec {
    role: Role,
    validator: FrameValidator,
    pending: BytesMut,
    needed: usize,
}

impl FrameCodec {
    /// Create a codec for the local `role`.
    #[must_use]
    pub fn new(role: Role, config: &Config) -> Self {
        let validator = FrameValidator::new(role, config.limits.clone())
            .with_accept_unmasked(config.accept_unmasked_frames);
        Self {
            role,
            validator,
            pending: BytesMut::new(),
            needed: 0,
        }
    }

    /// A codec with the same settings and nothing buffered.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self {
            role: self.role,
            validator: self.validator.clone(),
            pending: BytesMut::new(),
            needed: 0,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Bytes still missing for the frame being received, zero if unknown.
    #[must_use]
    pub fn needed(&self) -> usize {
        self.needed
    }

    /// Bytes held back for an incomplete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Decode as many complete frames from `data` as possible into `out`.
    ///
    /// Each frame is unmasked, checked against control-frame rules and then
    /// handed to `extension` (`is_frame_valid`, then `decode_frame`). Frames
    /// decoded before an error are left in `out`.
    ///
    /// # Errors
    ///
    /// Any header, masking, size or extension error. The codec must not be
    /// fed again after an error.
    pub fn decode(
        &mut self,
        data: &[u8],
        extension: &mut dyn Extension,
        out: &mut Vec<Frame>,
    ) -> Result<()> {
        self.pending.extend_from_slice(data);
        if self.needed > data.len() {
            self.needed -= data.len();
            return Ok(());
        }
        self.needed = 0;

        while !self.pending.is_empty() {
            let header = match FrameHeader::parse(&self.pending) {
                Ok(header) => header,
                Err(Error::IncompleteFrame { needed }) => {
                    self.needed = needed;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.validator.validate_header(&header)?;

            let total = header.frame_len()?;
            if self.pending.len() < total {
                self.needed = total - self.pending.len();
                return Ok(());
            }

            let mut raw = self.pending.split_to(total);
            let payload = raw.split_off(header.header_len);
            let mut frame = Frame::from_parts(&header, payload);
            frame.validate()?;
            extension.is_frame_valid(&frame)?;
            extension.decode_frame(&mut frame)?;

            trace!(
                opcode = %frame.opcode,
                fin = frame.fin,
                len = frame.payload().len(),
                "decoded frame"
            );
            out.push(frame);
        }
        Ok(())
    }

    /// Run `frame` through `extension`, mask it if we are a client, and
    /// append the wire bytes to `out`.
    ///
    /// # Errors
    ///
    /// Extension failures, or `Error::Io` when no random mask can be drawn.
    pub fn encode(
        &self,
        mut frame: Frame,
        extension: &mut dyn Extension,
        out: &mut BytesMut,
    ) -> Result<()> {
        extension.encode_frame(&mut frame)?;
        let mask = if self.role.must_mask() {
            Some(generate_mask()?)
        } else {
            None
        };
        trace!(
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            masked = mask.is_some(),
            "encoding frame"
        );
        frame.encode(out, mask);
        Ok(())
    }

    /// [`encode`](Self::encode) into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`encode`](Self::encode).
    pub fn encode_to_bytes(&self, frame: Frame, extension: &mut dyn Extension) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(frame.wire_size(self.role.must_mask()));
        self.encode(frame, extension, &mut out)?;
        Ok(out.freeze())
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.needed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::extensions::IdentityExtension;
    use crate::protocol::OpCode;

    fn server() -> FrameCodec {
        FrameCodec::new(Role::Server, &Config::default())
    }

    fn client() -> FrameCodec {
        FrameCodec::new(Role::Client, &Config::default())
    }

    fn decode_all(codec: &mut FrameCodec, data: &[u8]) -> Result<Vec<Frame>> {
        let mut out = Vec::new();
        codec.decode(data, &mut IdentityExtension, &mut out)?;
        Ok(out)
    }

    // ==========================================================================
    // Decoding
    // ==========================================================================

    #[test]
    fn test_client_frames_reach_server() {
        let bytes = client()
            .encode_to_bytes(Frame::text("Hello"), &mut IdentityExtension)
            .unwrap();
        assert_eq!(bytes[1] & 0x80, 0x80);

        let frames = decode_all(&mut server(), &bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"Hello");
        assert!(frames[0].masked);
    }

    #[test]
    fn test_several_frames_in_one_read() {
        let codec = client();
        let mut wire = BytesMut::new();
        codec.encode(Frame::text("a"), &mut IdentityExtension, &mut wire).unwrap();
        codec.encode(Frame::ping("b"), &mut IdentityExtension, &mut wire).unwrap();
        codec.encode(Frame::binary("c"), &mut IdentityExtension, &mut wire).unwrap();

        let frames = decode_all(&mut server(), &wire).unwrap();
        let opcodes: Vec<_> = frames.iter().map(|f| f.opcode).collect();
        assert_eq!(opcodes, vec![OpCode::Text, OpCode::Ping, OpCode::Binary]);
    }

    #[test]
    fn test_byte_at_a_time_tracks_needed() {
        let wire = client()
            .encode_to_bytes(Frame::binary(vec![7u8; 300]), &mut IdentityExtension)
            .unwrap();
        let mut codec = server();

        let mut frames = Vec::new();
        for (i, byte) in wire.iter().enumerate() {
            codec.decode(&[*byte], &mut IdentityExtension, &mut frames).unwrap();
            if i + 1 < wire.len() {
                assert!(frames.is_empty());
                assert_eq!(codec.buffered(), i + 1);
            }
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[7u8; 300][..]);
        assert_eq!(codec.buffered(), 0);
        assert_eq!(codec.needed(), 0);
    }

    #[test]
    fn test_needed_counts_down_without_reparse() {
        let wire = client()
            .encode_to_bytes(Frame::binary(vec![1u8; 200]), &mut IdentityExtension)
            .unwrap();
        let mut codec = server();
        let mut frames = Vec::new();

        codec.decode(&wire[..8], &mut IdentityExtension, &mut frames).unwrap();
        assert_eq!(codec.needed(), wire.len() - 8);
        codec.decode(&wire[8..50], &mut IdentityExtension, &mut frames).unwrap();
        assert_eq!(codec.needed(), wire.len() - 50);
        codec.decode(&wire[50..], &mut IdentityExtension, &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_unmasked_client_frame_rejected() {
        let wire = server()
            .encode_to_bytes(Frame::text("x"), &mut IdentityExtension)
            .unwrap();
        assert_eq!(
            decode_all(&mut server(), &wire),
            Err(Error::UnmaskedClientFrame)
        );
        assert_eq!(decode_all(&mut client(), &wire).unwrap().len(), 1);
    }

    #[test]
    fn test_unmasked_accepted_when_configured() {
        let config = Config::default().with_accept_unmasked_frames(true);
        let mut codec = FrameCodec::new(Role::Server, &config);
        let frames = decode_all(&mut codec, &[0x81, 0x01, b'x']).unwrap();
        assert_eq!(frames[0].payload(), b"x");
    }

    #[test]
    fn test_oversized_frame_rejected_from_header() {
        let config = Config::default().with_limits(Limits::new(10, 100, 4, 1024));
        let mut codec = FrameCodec::new(Role::Client, &config);
        // Only the header has arrived; the limit trips before buffering payload.
        assert!(matches!(
            decode_all(&mut codec, &[0x82, 126, 0x01, 0x00]),
            Err(Error::FrameTooLarge { size: 256, max: 10 })
        ));
    }

    #[test]
    fn test_reserved_bits_need_extension() {
        assert_eq!(
            decode_all(&mut client(), &[0xC1, 0x00]),
            Err(Error::ReservedBitsSet)
        );
    }

    #[test]
    fn test_fragmented_ping_rejected() {
        assert_eq!(
            decode_all(&mut client(), &[0x09, 0x00]),
            Err(Error::FragmentedControlFrame)
        );
    }

    #[test]
    fn test_frames_before_error_are_kept() {
        let mut out = Vec::new();
        let result = client().decode(
            &[0x81, 0x01, b'a', 0x83, 0x00],
            &mut IdentityExtension,
            &mut out,
        );
        assert_eq!(result, Err(Error::ReservedOpcode(3)));
        assert_eq!(out.len(), 1);
    }

    // ==========================================================================
    // Encoding
    // ==========================================================================

    #[test]
    fn test_server_never_masks() {
        let bytes = server()
            .encode_to_bytes(Frame::text("Hello"), &mut IdentityExtension)
            .unwrap();
        assert_eq!(&bytes[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_fresh_and_reset_drop_pending() {
        let mut codec = server();
        let mut out = Vec::new();
        codec.decode(&[0x81], &mut IdentityExtension, &mut out).unwrap();
        assert_eq!(codec.fresh().buffered(), 0);
        codec.reset();
        assert_eq!(codec.buffered(), 0);
        assert_eq!(codec.role(), Role::Server);
    }
}
