//! Byte-stream codecs.
//!
//! Both codecs are resumable: bytes may be fed in chunks of any size and a
//! partially received frame is kept until the rest arrives.
//!
//! - [`FrameCodec`]: length-prefixed frames (RFC 6455, hybi drafts)
//! - [`SentinelCodec`]: `0x00 .. 0xFF` delimited text frames (hixie drafts)

mod framed;
mod sentinel;

pub use framed::FrameCodec;
pub use sentinel::SentinelCodec;
