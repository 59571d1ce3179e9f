//! Header checks applied before a frame's payload is buffered.
//!
//! - Masking rules per RFC 6455 Section 5.1
//! - Frame size limits
//!
//! Reserved-bit checks belong to the extension pipeline.

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;

/// Validator for incoming frame headers.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
}

impl FrameValidator {
    /// Create a validator for the receiving side `role`.
    #[must_use]
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
        }
    }

    /// Let a server accept unmasked client frames (non-RFC compliant).
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Validate an incoming header.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` - Server received unmasked frame from client
    /// - `Error::MaskedServerFrame` - Client received masked frame from server
    /// - `Error::FrameTooLarge` - Frame exceeds size limit
    pub fn validate_header(&self, header: &FrameHeader) -> Result<()> {
        let masked = header.mask.is_some();
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                return Err(Error::UnmaskedClientFrame);
            }
            Role::Client if masked => return Err(Error::MaskedServerFrame),
            _ => {}
        }
        self.limits.check_frame_size(header.payload_len)
    }
}
