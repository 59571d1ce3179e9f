//! Reassembly of fragmented messages (RFC 6455 Section 5.4).

use bytes::{Bytes, BytesMut};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::{Frame, OpCode};

/// Collects data frames until the final fragment arrives.
///
/// Control frames may be interleaved between fragments; they are not
/// buffered here and must be handled by the caller.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    utf8: Option<Utf8Validator>,
    limits: Limits,
}

impl MessageAssembler {
    /// Create an assembler enforcing `limits`.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            utf8: None,
            limits,
        }
    }

    /// Add a data frame to the message being assembled.
    ///
    /// Returns the complete message once a frame with FIN=1 is seen.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with no open message,
    ///   or a new data frame while a message is still open
    /// - limit errors for too many fragments or too many bytes
    /// - `Error::InvalidUtf8` as soon as a text payload stops being UTF-8
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        if frame.opcode.is_control() {
            return Err(Error::Internal(
                "control frame handed to message assembler".into(),
            ));
        }

        if frame.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                return Err(Error::ProtocolViolation(
                    "Continuous frame sequence was not started".into(),
                ));
            }
        } else {
            if self.opcode.is_some() {
                return Err(Error::ProtocolViolation(
                    "Previous continuous frame sequence not completed".into(),
                ));
            }
            self.opcode = Some(frame.opcode);
            if frame.opcode == OpCode::Text {
                self.utf8 = Some(Utf8Validator::new());
            }
        }

        self.limits.check_fragment_count(self.fragment_count + 1)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload().len())?;

        if let Some(validator) = self.utf8.as_mut() {
            validator.validate(frame.payload(), frame.fin)?;
        }

        self.fragment_count += 1;
        let fin = frame.fin;

        // Single-frame messages hand their payload through without copying.
        if fin && self.buffer.is_empty() {
            let opcode = self.finish()?;
            return Ok(Some(AssembledMessage {
                opcode,
                payload: frame.into_payload(),
            }));
        }

        self.buffer.extend_from_slice(frame.payload());
        if fin {
            let payload = self.buffer.split().freeze();
            let opcode = self.finish()?;
            Ok(Some(AssembledMessage { opcode, payload }))
        } else {
            Ok(None)
        }
    }

    fn finish(&mut self) -> Result<OpCode> {
        self.fragment_count = 0;
        self.utf8 = None;
        self.opcode
            .take()
            .ok_or_else(|| Error::Internal("assembler lost its opcode".into()))
    }

    /// Whether a fragmented message is in progress.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Drop any partially assembled message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
        self.utf8 = None;
    }
}

/// A fully assembled data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// `Text` or `Binary`.
    pub opcode: OpCode,
    /// Concatenated payload.
    pub payload: Bytes,
}

impl AssembledMessage {
    /// Convert into an application message.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` for a text payload that is not UTF-8.
    pub fn into_message(self) -> Result<Message> {
        match self.opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(self.payload.to_vec())?)),
            _ => Ok(Message::Binary(self.payload.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(Limits::default())
    }

    fn small_assembler() -> MessageAssembler {
        MessageAssembler::new(Limits::new(1024, 100, 3, 4096))
    }

    #[test]
    fn test_single_frame_message() {
        let mut assembler = assembler();
        let msg = assembler.push(Frame::text("Hello")).unwrap().unwrap();
        assert_eq!(msg.opcode, OpCode::Text);
        assert_eq!(&msg.payload[..], b"Hello");
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_three_fragment_text_message() {
        let mut assembler = assembler();
        assert!(assembler.push(Frame::new(false, OpCode::Text, "Hel")).unwrap().is_none());
        assert!(assembler.is_assembling());
        assert!(assembler.push(Frame::continuation(false, "l")).unwrap().is_none());

        let msg = assembler.push(Frame::continuation(true, "o")).unwrap().unwrap();
        assert_eq!(msg.into_message().unwrap(), Message::text("Hello"));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_max_message_size_exceeded() {
        let mut assembler = small_assembler();
        let result = assembler.push(Frame::text(vec![b'a'; 150]));
        assert!(matches!(result, Err(Error::MessageTooLarge { .. })));
    }

    #[test]
    fn test_max_fragment_count_exceeded() {
        let mut assembler = small_assembler();
        assembler.push(Frame::new(false, OpCode::Binary, vec![1])).unwrap();
        assembler.push(Frame::continuation(false, vec![2])).unwrap();
        assembler.push(Frame::continuation(false, vec![3])).unwrap();
        let result = assembler.push(Frame::continuation(true, vec![4]));
        assert!(matches!(result, Err(Error::TooManyFragments { .. })));
    }

    #[test]
    fn test_continuation_without_start_fails() {
        let mut assembler = assembler();
        let result = assembler.push(Frame::continuation(true, "data"));
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_new_message_without_continuation_fails() {
        let mut assembler = assembler();
        assembler.push(Frame::new(false, OpCode::Text, "first")).unwrap();
        let result = assembler.push(Frame::text("second"));
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        let mut assembler = assembler();
        assembler.push(Frame::new(false, OpCode::Text, vec![0xf0, 0x9f])).unwrap();
        let msg = assembler
            .push(Frame::continuation(true, vec![0x8e, 0x89]))
            .unwrap()
            .unwrap();
        assert_eq!(msg.into_message().unwrap(), Message::text("🎉"));
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let mut assembler = assembler();
        let result = assembler.push(Frame::text(vec![0x80, 0x81]));
        assert_eq!(result, Err(Error::InvalidUtf8));
    }

    #[test]
    fn test_binary_not_utf8_checked() {
        let mut assembler = assembler();
        let msg = assembler
            .push(Frame::binary(vec![0x80, 0x81, 0xff]))
            .unwrap()
            .unwrap();
        assert_eq!(
            msg.into_message().unwrap(),
            Message::binary(vec![0x80, 0x81, 0xff])
        );
    }

    #[test]
    fn test_control_frame_rejected() {
        let mut assembler = assembler();
        assert!(matches!(
            assembler.push(Frame::ping("x")),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_reset() {
        let mut assembler = assembler();
        assembler.push(Frame::new(false, OpCode::Text, "partial")).unwrap();
        assembler.reset();
        assert!(!assembler.is_assembling());
        assert!(assembler.push(Frame::text("fresh")).unwrap().is_some());
    }
}
