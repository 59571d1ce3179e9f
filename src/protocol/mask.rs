//! Payload masking (RFC 6455 Section 5.3).
//!
//! Byte `i` of a masked payload is XORed with byte `i % 4` of the key, so
//! masking and unmasking are the same operation.

use crate::error::Result;

/// Byte-by-byte XOR masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Word-at-a-time XOR masking, equivalent to [`apply_mask`].
///
/// Processes eight bytes per step; the key is repeated twice to fill a
/// `u64`, which keeps the key phase aligned because 8 is a multiple of 4.
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let wide = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ wide;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // Tail starts at a multiple of 8, so the key phase restarts at 0.
    apply_mask(chunks.into_remainder(), mask);
}

/// Draw a fresh masking key from the OS random source.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if the random source is unavailable.
pub fn generate_mask() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key).map_err(|e| crate::Error::Io(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_reversible() {
        let original = b"Hello, WebSocket!".to_vec();
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut data = original.clone();

        apply_mask(&mut data, mask);
        assert_ne!(data, original);
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn test_masking_example_from_rfc() {
        // RFC 6455 Section 5.7: "Hello" masked with 37 fa 21 3d
        let mut data = b"Hello".to_vec();
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_masking_empty() {
        let mut data: Vec<u8> = vec![];
        apply_mask(&mut data, [1, 2, 3, 4]);
        apply_mask_fast(&mut data, [1, 2, 3, 4]);
        assert!(data.is_empty());
    }

    #[test]
    fn test_masking_fast_equivalent() {
        let mask = [0xAB, 0xCD, 0xEF, 0x01];
        for len in [1, 3, 4, 7, 8, 9, 15, 16, 17, 100, 1023] {
            let original: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let mut slow = original.clone();
            let mut fast = original.clone();
            apply_mask(&mut slow, mask);
            apply_mask_fast(&mut fast, mask);
            assert_eq!(slow, fast, "length {len}");
        }
    }

    #[test]
    fn test_generate_mask_varies() {
        let keys: Vec<[u8; 4]> = (0..8).map(|_| generate_mask().unwrap()).collect();
        assert!(keys.windows(2).any(|w| w[0] != w[1]));
    }
}
