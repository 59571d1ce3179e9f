use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::error::{Error, Result};
use crate::message::CloseCode;
use crate::message::CloseFrame;
use crate::protocol::{Frame, OpCode};

const START_OF_FRAME: u8 = 0x00;
const END_OF_FRAME: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Reading,
    AwaitClose,
}

/// Codec for the pre-RFC drafts: text frames delimited by `0x00` and `0xFF`.
///
/// With `with_close` the two-byte `0xFF 0x00` close frame is understood as
/// well. Anything but text and (optionally) close cannot be expressed.
#[derive(Debug, Clone)]
pub struct SentinelCodec {
    draft: &'static str,
    supports_close: bool,
    max_frame_size: usize,
    state: State,
    current: BytesMut,
}

impl SentinelCodec {
    /// Codec reporting errors on behalf of `draft`.
    #[must_use]
    pub fn new(draft: &'static str, max_frame_size: usize) -> Self {
        Self {
            draft,
            supports_close: false,
            max_frame_size,
            state: State::Idle,
            current: BytesMut::new(),
        }
    }

    /// Understand the `0xFF 0x00` close frame.
    #[must_use]
    pub fn with_close(mut self) -> Self {
        self.supports_close = true;
        self
    }

    #[must_use]
    pub fn fresh(&self) -> Self {
        Self {
            state: State::Idle,
            current: BytesMut::new(),
            ..self.clone()
        }
    }

    /// Feed `data`, pushing every completed frame to `out`.
    ///
    /// # Errors
    ///
    /// `Error::ProtocolViolation` for a sentinel in the wrong place or a
    /// byte outside any frame, `Error::FrameTooLarge` past the size limit.
    pub fn decode(&mut self, data: &[u8], out: &mut Vec<Frame>) -> Result<()> {
        for &byte in data {
            match (self.state, byte) {
                (State::Idle, START_OF_FRAME) => self.state = State::Reading,
                (State::Idle, END_OF_FRAME) if self.supports_close => {
                    self.state = State::AwaitClose;
                }
                (State::Idle, END_OF_FRAME) => {
                    return Err(Error::ProtocolViolation("unexpected END_OF_FRAME".into()));
                }
                (State::Idle, other) => {
                    return Err(Error::ProtocolViolation(format!(
                        "unexpected byte {other:#04x} between frames"
                    )));
                }
                (State::Reading, START_OF_FRAME) => {
                    return Err(Error::ProtocolViolation(
                        "unexpected START_OF_FRAME".into(),
                    ));
                }
                (State::Reading, END_OF_FRAME) => {
                    let payload = self.current.split().freeze();
                    trace!(draft = self.draft, len = payload.len(), "decoded frame");
                    out.push(Frame::text(payload));
                    self.state = State::Idle;
                }
                (State::Reading, other) => {
                    if self.current.len() >= self.max_frame_size {
                        return Err(Error::FrameTooLarge {
                            size: self.current.len() + 1,
                            max: self.max_frame_size,
                        });
                    }
                    self.current.put_u8(other);
                }
                (State::AwaitClose, 0x00) => {
                    out.push(Frame::close(&CloseFrame::new(CloseCode::Normal, ""))?);
                    self.state = State::Idle;
                }
                (State::AwaitClose, other) => {
                    return Err(Error::ProtocolViolation(format!(
                        "unexpected byte {other:#04x} in close frame"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Append the wire form of `frame` to `out`.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` for frames the draft cannot carry.
    pub fn encode(&self, frame: &Frame, out: &mut BytesMut) -> Result<()> {
        match frame.opcode {
            OpCode::Text if frame.fin => {
                out.reserve(frame.payload().len() + 2);
                out.put_u8(START_OF_FRAME);
                out.put_slice(frame.payload());
                out.put_u8(END_OF_FRAME);
                Ok(())
            }
            OpCode::Close if self.supports_close => {
                out.put_slice(&[END_OF_FRAME, 0x00]);
                Ok(())
            }
            OpCode::Text | OpCode::Continuation => Err(self.unsupported("fragmented message")),
            OpCode::Binary => Err(self.unsupported("binary message")),
            OpCode::Ping | OpCode::Pong => Err(self.unsupported("ping/pong")),
            OpCode::Close => Err(self.unsupported("close frame")),
        }
    }

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            draft: self.draft,
            operation,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hixie75() -> SentinelCodec {
        SentinelCodec::new("hixie-75", 1024)
    }

    fn hixie76() -> SentinelCodec {
        SentinelCodec::new("hixie-76", 1024).with_close()
    }

    fn decode(codec: &mut SentinelCodec, data: &[u8]) -> Result<Vec<Frame>> {
        let mut out = Vec::new();
        codec.decode(data, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_text_frames() {
        let frames = decode(&mut hixie75(), b"\x00hello\xff\x00world\xff").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[0].payload(), b"hello");
        assert_eq!(frames[1].payload(), b"world");
    }

    #[test]
    fn test_split_across_reads() {
        let mut codec = hixie75();
        assert!(decode(&mut codec, b"\x00he").unwrap().is_empty());
        assert!(decode(&mut codec, b"ll").unwrap().is_empty());
        let frames = decode(&mut codec, b"o\xff").unwrap();
        assert_eq!(frames[0].payload(), b"hello");
    }

    #[test]
    fn test_misplaced_sentinels() {
        assert!(matches!(
            decode(&mut hixie75(), b"\x00ab\x00"),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            decode(&mut hixie75(), b"\xff\x00"),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            decode(&mut hixie75(), b"x"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_close_frame_with_close_support() {
        let frames = decode(&mut hixie76(), b"\x00bye\xff\xff\x00").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].opcode, OpCode::Close);
        let close = CloseFrame::from_payload(frames[1].payload()).unwrap();
        assert_eq!(close.code, CloseCode::Normal);

        assert!(decode(&mut hixie76(), b"\xff\x01").is_err());
    }

    #[test]
    fn test_frame_size_limit() {
        let mut codec = SentinelCodec::new("hixie-75", 3);
        assert!(decode(&mut codec, b"\x00abc\xff").is_ok());
        assert!(matches!(
            decode(&mut codec, b"\x00abcd"),
            Err(Error::FrameTooLarge { max: 3, .. })
        ));
    }

    #[test]
    fn test_encode() {
        let mut out = BytesMut::new();
        hixie76().encode(&Frame::text("hi"), &mut out).unwrap();
        let close = Frame::close(&CloseFrame::new(CloseCode::Normal, "")).unwrap();
        hixie76().encode(&close, &mut out).unwrap();
        assert_eq!(&out[..], b"\x00hi\xff\xff\x00");
    }

    #[test]
    fn test_encode_unsupported() {
        let mut out = BytesMut::new();
        assert!(matches!(
            hixie75().encode(&Frame::binary("x"), &mut out),
            Err(Error::Unsupported { draft: "hixie-75", .. })
        ));
        assert!(hixie75().encode(&Frame::ping(""), &mut out).is_err());
        assert!(hixie75().encode(&Frame::new(false, OpCode::Text, "x"), &mut out).is_err());
        let close = Frame::close(&CloseFrame::new(CloseCode::Normal, "")).unwrap();
        assert!(hixie75().encode(&close, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut codec = hixie75();
        decode(&mut codec, b"\x00part").unwrap();
        codec.reset();
        assert!(decode(&mut codec, b"rest").is_err());
        assert!(codec.fresh().decode(b"\x00x\xff", &mut Vec::new()).is_ok());
    }
}
