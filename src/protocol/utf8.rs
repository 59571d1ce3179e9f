//! UTF-8 validation for text messages.
//!
//! Text messages may be split at any byte, including inside a multi-byte
//! sequence, so fragments are validated incrementally.

use crate::error::{Error, Result};

/// Incremental UTF-8 validator for fragmented text messages.
///
/// At most three bytes of an unfinished sequence are carried over from one
/// fragment to the next.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    pending: [u8; 4],
    pending_len: usize,
}

/// Length of the sequence introduced by `lead`, or `None` if not a lead byte.
const fn sequence_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

impl Utf8Validator {
    /// Create a new UTF-8 validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next fragment.
    ///
    /// A non-final fragment may end in the middle of a code point; a final
    /// fragment must leave nothing pending.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` as soon as an invalid sequence is seen.
    pub fn validate(&mut self, mut data: &[u8], is_final: bool) -> Result<()> {
        if self.pending_len > 0 {
            let Some(want) = sequence_len(self.pending[0]) else {
                return Err(Error::InvalidUtf8);
            };
            let take = (want - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];

            if self.pending_len < want {
                // Still short; make sure what we have is a valid prefix.
                return self.check_tail(is_final);
            }
            std::str::from_utf8(&self.pending[..want])?;
            self.pending_len = 0;
        }

        match std::str::from_utf8(data) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() && !is_final => {
                let tail = &data[e.valid_up_to()..];
                self.pending[..tail.len()].copy_from_slice(tail);
                self.pending_len = tail.len();
                Ok(())
            }
            Err(_) => Err(Error::InvalidUtf8),
        }
    }

    fn check_tail(&mut self, is_final: bool) -> Result<()> {
        match std::str::from_utf8(&self.pending[..self.pending_len]) {
            Err(e) if e.error_len().is_none() && !is_final => Ok(()),
            _ => Err(Error::InvalidUtf8),
        }
    }

    /// Reset the validator state, discarding any pending bytes.
    pub fn reset(&mut self) {
        self.pending_len = 0;
    }

    /// Check if an unfinished sequence is pending.
    #[must_use]
    pub fn has_incomplete(&self) -> bool {
        self.pending_len > 0
    }
}

/// Validate that a complete byte slice is UTF-8.
///
/// # Errors
///
/// Returns `Error::InvalidUtf8` if the data is not valid UTF-8.
pub fn validate_utf8(data: &[u8]) -> Result<()> {
    std::str::from_utf8(data)
        .map(|_| ())
        .map_err(|_| Error::InvalidUtf8)
}
