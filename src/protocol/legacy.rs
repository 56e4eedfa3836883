//! Legacy (Hybi-00) wire framing.
//!
//! The Hixie-era draft has no binary header: a text frame is the byte `0x00`,
//! the UTF-8 payload, then the terminator `0xFF`. The close frame is the
//! fixed two-byte sequence `0xFF 0x00` and carries no payload. Frame length
//! is discovered by scanning for the terminator, so the scan must be bounded
//! to avoid unbounded buffering.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Leading byte of a legacy text frame.
pub const TEXT_START: u8 = 0x00;
/// Terminator byte of a legacy text frame.
pub const TEXT_END: u8 = 0xFF;
/// The legacy close frame.
pub const CLOSE_MARKER: [u8; 2] = [0xFF, 0x00];

/// One decoded legacy frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyFrame {
    /// A text frame payload (UTF-8 validity checked by the channel).
    Text(Vec<u8>),
    /// The close marker.
    Close,
}

/// Decode one frame from the front of `buf`.
///
/// Returns `None` while the buffer holds only part of a frame, together with
/// the decoded frame the number of consumed bytes otherwise.
///
/// # Errors
///
/// - [`Error::FrameTooLarge`] if a text frame has no terminator within
///   `max_frame_size` payload bytes
/// - [`Error::ProtocolViolation`] for a leading byte that opens neither a
///   text frame nor the close marker
pub fn decode(buf: &[u8], max_frame_size: usize) -> Result<Option<(LegacyFrame, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    match first {
        TEXT_START => {
            let body = &buf[1..];
            match body.iter().position(|&b| b == TEXT_END) {
                Some(end) => {
                    if end > max_frame_size {
                        return Err(Error::FrameTooLarge {
                            size: end,
                            max: max_frame_size,
                        });
                    }
                    Ok(Some((LegacyFrame::Text(body[..end].to_vec()), end + 2)))
                }
                None => {
                    // Terminator not seen yet; the scan is still bounded.
                    if body.len() > max_frame_size {
                        return Err(Error::FrameTooLarge {
                            size: body.len(),
                            max: max_frame_size,
                        });
                    }
                    Ok(None)
                }
            }
        }
        TEXT_END => {
            if buf.len() < 2 {
                return Ok(None);
            }
            if buf[1] != CLOSE_MARKER[1] {
                return Err(Error::ProtocolViolation(format!(
                    "Malformed legacy close marker: 0xff {:#04x}",
                    buf[1]
                )));
            }
            Ok(Some((LegacyFrame::Close, 2)))
        }
        other => Err(Error::ProtocolViolation(format!(
            "Unexpected legacy frame type: {other:#04x}"
        ))),
    }
}

/// Append a legacy text frame to `dst`.
pub fn encode_text(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + 2);
    dst.put_u8(TEXT_START);
    dst.put_slice(payload);
    dst.put_u8(TEXT_END);
}

/// Append the legacy close marker to `dst`.
pub fn encode_close(dst: &mut BytesMut) {
    dst.put_slice(&CLOSE_MARKER);
}
