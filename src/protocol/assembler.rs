//! Reassembly of fragmented messages.
//!
//! Data frames arrive as an opening Text/Binary frame followed by
//! continuation frames until one carries FIN. The assembler concatenates the
//! fragments, remembers the logical kind and the reserved bits of the first
//! fragment, and validates text incrementally so a multi-byte character split
//! across fragments is handled correctly. Control frames never pass through
//! here; they interleave at fragment boundaries and are surfaced directly.

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::FrameKind;
use crate::protocol::OpCode;
use crate::protocol::utf8::Utf8Validator;

/// Reassembles fragmented data messages.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragments: usize,
    kind: Option<FrameKind>,
    rsv: u8,
    utf8: Option<Utf8Validator>,
    limits: Limits,
}

/// A fully reassembled data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// Logical kind of the first fragment.
    pub kind: FrameKind,
    /// Reserved bits of the first fragment, for inbound extension decoding.
    pub rsv: u8,
    /// Concatenated payload.
    pub payload: Vec<u8>,
}

impl MessageAssembler {
    /// Create an assembler bound to the channel's limits.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragments: 0,
            kind: None,
            rsv: 0,
            utf8: None,
            limits,
        }
    }

    /// Add a data frame.
    ///
    /// Returns the complete message once the FIN fragment arrives, `None`
    /// while fragments are still outstanding.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] for a continuation with no message in
    ///   progress, a new data opcode while one is, or reserved bits on a
    ///   continuation frame
    /// - [`Error::TooManyFragments`] / [`Error::MessageTooLarge`] when limits
    ///   are exceeded
    /// - [`Error::InvalidUtf8`] for invalid text
    pub fn push(
        &mut self,
        opcode: OpCode,
        fin: bool,
        rsv: u8,
        payload: &[u8],
    ) -> Result<Option<AssembledMessage>> {
        match opcode {
            OpCode::Continuation => {
                if self.kind.is_none() {
                    return Err(Error::ProtocolViolation(
                        "Continuation frame without a message in progress".into(),
                    ));
                }
                if rsv != 0 {
                    return Err(Error::ProtocolViolation(
                        "Reserved bits on a continuation frame".into(),
                    ));
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.kind.is_some() {
                    return Err(Error::ProtocolViolation(
                        "New data frame while a fragmented message is in progress".into(),
                    ));
                }
                let kind = if opcode == OpCode::Text {
                    FrameKind::Text
                } else {
                    FrameKind::Binary
                };
                self.kind = Some(kind);
                self.rsv = rsv;
                // Payload transformed by an extension is validated after the
                // inbound pipeline has run, not on the wire bytes.
                if kind == FrameKind::Text && rsv == 0 {
                    self.utf8 = Some(Utf8Validator::new());
                }
            }
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "Assembler fed a control frame: {other}"
                )));
            }
        }

        self.limits.check_fragment_count(self.fragments + 1)?;
        self.limits
            .check_message_size(self.buffer.len() + payload.len())?;

        if let Some(validator) = &mut self.utf8 {
            validator.push(payload)?;
            if fin {
                validator.finish()?;
            }
        }

        self.buffer.extend_from_slice(payload);
        self.fragments += 1;

        if fin {
            let payload = self.buffer.split().to_vec();
            let kind = self.kind.take().expect("message in progress");
            let rsv = self.rsv;
            self.fragments = 0;
            self.rsv = 0;
            self.utf8 = None;
            Ok(Some(AssembledMessage { kind, rsv, payload }))
        } else {
            Ok(None)
        }
    }

    /// Whether a fragmented message is in progress.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.kind.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(Limits::default())
    }

    #[test]
    fn test_single_frame_message() {
        let mut a = assembler();
        let msg = a.push(OpCode::Text, true, 0, b"Hello").unwrap().unwrap();
        assert_eq!(msg.kind, FrameKind::Text);
        assert_eq!(msg.payload, b"Hello");
        assert!(!a.in_progress());
    }

    #[test]
    fn test_three_fragment_text_message() {
        let mut a = assembler();
        assert!(a.push(OpCode::Text, false, 0, b"one ").unwrap().is_none());
        assert!(a.in_progress());
        assert!(
            a.push(OpCode::Continuation, false, 0, b"two ")
                .unwrap()
                .is_none()
        );
        let msg = a
            .push(OpCode::Continuation, true, 0, b"three")
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind, FrameKind::Text);
        assert_eq!(msg.payload, b"one two three");
    }

    #[test]
    fn test_binary_message_keeps_kind() {
        let mut a = assembler();
        assert!(a.push(OpCode::Binary, false, 0, &[1, 2]).unwrap().is_none());
        let msg = a
            .push(OpCode::Continuation, true, 0, &[3, 4])
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind, FrameKind::Binary);
        assert_eq!(msg.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_continuation_without_start() {
        let mut a = assembler();
        assert!(matches!(
            a.push(OpCode::Continuation, true, 0, b"x"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_new_data_frame_mid_message() {
        let mut a = assembler();
        a.push(OpCode::Text, false, 0, b"first").unwrap();
        assert!(matches!(
            a.push(OpCode::Text, true, 0, b"second"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_rsv_on_continuation_rejected() {
        let mut a = assembler();
        a.push(OpCode::Text, false, crate::protocol::frame::RSV1, b"x")
            .unwrap();
        assert!(matches!(
            a.push(OpCode::Continuation, true, crate::protocol::frame::RSV1, b"y"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_first_fragment_rsv_recorded() {
        let mut a = assembler();
        a.push(OpCode::Binary, false, crate::protocol::frame::RSV1, &[1])
            .unwrap();
        let msg = a.push(OpCode::Continuation, true, 0, &[2]).unwrap().unwrap();
        assert_eq!(msg.rsv, crate::protocol::frame::RSV1);
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        // 🎉 split after two bytes.
        let mut a = assembler();
        assert!(
            a.push(OpCode::Text, false, 0, &[0xf0, 0x9f])
                .unwrap()
                .is_none()
        );
        let msg = a
            .push(OpCode::Continuation, true, 0, &[0x8e, 0x89])
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8(msg.payload).unwrap(), "🎉");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut a = assembler();
        assert!(matches!(
            a.push(OpCode::Text, true, 0, &[0xc0, 0x80]),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn test_truncated_utf8_at_fin_rejected() {
        let mut a = assembler();
        a.push(OpCode::Text, false, 0, &[0xe2]).unwrap();
        assert!(matches!(
            a.push(OpCode::Continuation, true, 0, &[]),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn test_compressed_text_skips_wire_utf8_check() {
        // Deflated bytes are rarely valid UTF-8; with RSV1 set the check is
        // deferred until after decompression.
        let mut a = assembler();
        let msg = a
            .push(OpCode::Text, true, crate::protocol::frame::RSV1, &[0xc0, 0x80])
            .unwrap()
            .unwrap();
        assert_eq!(msg.rsv, crate::protocol::frame::RSV1);
    }

    #[test]
    fn test_binary_skips_utf8_check() {
        let mut a = assembler();
        let msg = a
            .push(OpCode::Binary, true, 0, &[0x80, 0xff])
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, vec![0x80, 0xff]);
    }

    #[test]
    fn test_fragment_count_limit() {
        let limits = Limits::new(1024, 4096, 2, 1024);
        let mut a = MessageAssembler::new(limits);
        a.push(OpCode::Binary, false, 0, &[1]).unwrap();
        a.push(OpCode::Continuation, false, 0, &[2]).unwrap();
        assert!(matches!(
            a.push(OpCode::Continuation, true, 0, &[3]),
            Err(Error::TooManyFragments { count: 3, max: 2 })
        ));
    }

    #[test]
    fn test_message_size_limit() {
        let limits = Limits::new(1024, 8, 16, 1024);
        let mut a = MessageAssembler::new(limits);
        a.push(OpCode::Binary, false, 0, &[0; 8]).unwrap();
        assert!(matches!(
            a.push(OpCode::Continuation, true, 0, &[0]),
            Err(Error::MessageTooLarge { size: 9, max: 8 })
        ));
    }

    #[test]
    fn test_control_frame_rejected() {
        let mut a = assembler();
        assert!(matches!(
            a.push(OpCode::Ping, true, 0, b"x"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_assembler_reusable_after_message() {
        let mut a = assembler();
        a.push(OpCode::Text, true, 0, b"first").unwrap().unwrap();
        let msg = a.push(OpCode::Text, true, 0, b"second").unwrap().unwrap();
        assert_eq!(msg.payload, b"second");
    }
}
