//! Incremental UTF-8 validation for text messages.
//!
//! Text payloads must be valid UTF-8, but a multi-byte scalar can straddle a
//! fragment boundary. The validator holds the truncated tail of one fragment
//! (at most three bytes, the longest incomplete sequence) and checks it
//! together with the next fragment, so a split character is never falsely
//! rejected and a genuinely invalid byte is reported as soon as it is seen.

use crate::error::{Error, Result};

/// Streaming UTF-8 validator.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    pending: [u8; 3],
    pending_len: u8,
}

impl Utf8Validator {
    /// Create a validator with no pending bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of a text message.
    ///
    /// An incomplete multi-byte sequence at the end of the chunk is held back
    /// and completed by a later chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUtf8`] on the first byte that can never be
    /// part of a valid sequence.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let carried;
        let data: &[u8] = if self.pending_len > 0 {
            let mut joined = Vec::with_capacity(self.pending_len as usize + chunk.len());
            joined.extend_from_slice(&self.pending[..self.pending_len as usize]);
            joined.extend_from_slice(chunk);
            carried = joined;
            &carried
        } else {
            chunk
        };
        self.pending_len = 0;

        match std::str::from_utf8(data) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() => {
                // Truncated sequence at the end; stash it for the next chunk.
                // A truncated scalar is at most three bytes.
                let tail = &data[e.valid_up_to()..];
                if tail.len() > 3 {
                    return Err(Error::InvalidUtf8);
                }
                self.pending[..tail.len()].copy_from_slice(tail);
                self.pending_len = tail.len() as u8;
                Ok(())
            }
            Err(_) => Err(Error::InvalidUtf8),
        }
    }

    /// Close the message: no incomplete sequence may remain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUtf8`] if the message ended mid-character.
    pub fn finish(&mut self) -> Result<()> {
        let truncated = self.pending_len > 0;
        self.pending_len = 0;
        if truncated {
            Err(Error::InvalidUtf8)
        } else {
            Ok(())
        }
    }

    /// Whether bytes are held back waiting for the next chunk.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_len > 0
    }

    /// Discard any held-back bytes.
    pub fn reset(&mut self) {
        self.pending_len = 0;
    }
}

/// Validate a complete (non-fragmented) text payload.
///
/// # Errors
///
/// Returns [`Error::InvalidUtf8`] if `data` is not valid UTF-8.
pub fn validate_utf8(data: &[u8]) -> Result<()> {
    std::str::from_utf8(data)
        .map(|_| ())
        .map_err(|_| Error::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_and_multibyte() {
        let mut v = Utf8Validator::new();
        assert!(v.push(b"plain ascii").is_ok());
        assert!(v.push("żółć 世界 🎉".as_bytes()).is_ok());
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(Utf8Validator::new().push(&[0x80]).is_err());
        assert!(Utf8Validator::new().push(&[0xff]).is_err());
        // Overlong encoding of NUL.
        assert!(Utf8Validator::new().push(&[0xc0, 0x80]).is_err());
        // Truncated sequence continued by a non-continuation byte.
        assert!(Utf8Validator::new().push(&[0xe0, 0x80]).is_err());
    }

    #[test]
    fn test_split_three_byte_char() {
        // € = e2 82 ac
        let mut v = Utf8Validator::new();
        assert!(v.push(&[0xe2]).is_ok());
        assert!(v.has_pending());
        assert!(v.push(&[0x82, 0xac]).is_ok());
        assert!(!v.has_pending());
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_split_four_byte_char_every_way() {
        // 🎉 = f0 9f 8e 89
        let bytes = [0xf0, 0x9f, 0x8e, 0x89];
        for split in 1..bytes.len() {
            let mut v = Utf8Validator::new();
            assert!(v.push(&bytes[..split]).is_ok(), "split {split}");
            assert!(v.push(&bytes[split..]).is_ok(), "split {split}");
            assert!(v.finish().is_ok(), "split {split}");
        }
    }

    #[test]
    fn test_split_across_three_chunks() {
        let mut v = Utf8Validator::new();
        assert!(v.push(&[0xf0]).is_ok());
        assert!(v.push(&[0x9f]).is_ok());
        assert!(v.push(&[0x8e, 0x89]).is_ok());
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_truncated_at_finish() {
        let mut v = Utf8Validator::new();
        assert!(v.push(&[0xe2]).is_ok());
        assert!(v.finish().is_err());
    }

    #[test]
    fn test_empty_chunks_preserve_pending() {
        let mut v = Utf8Validator::new();
        assert!(v.push(&[0xe2]).is_ok());
        assert!(v.push(&[]).is_ok());
        assert!(v.has_pending());
        assert!(v.push(&[0x82, 0xac]).is_ok());
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_invalid_mid_chunk() {
        let mut v = Utf8Validator::new();
        assert!(v.push(&[b'H', b'e', 0x80, b'l', b'o']).is_err());
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut v = Utf8Validator::new();
        assert!(v.push(&[0xe2]).is_ok());
        v.reset();
        assert!(!v.has_pending());
        assert!(v.push(b"fresh").is_ok());
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_validate_complete() {
        assert!(validate_utf8(b"ok").is_ok());
        assert!(validate_utf8("émoji 🎉".as_bytes()).is_ok());
        assert!(validate_utf8(&[0xc0, 0x80]).is_err());
    }
}
