//! Per-frame channels: the write-side sink and read-side source.

use crate::channel::channel::Channel;
use crate::error::{Error, Result};
use crate::message::FrameKind;

/// Single-use write endpoint for one outbound frame.
///
/// Created by [`Channel::send`] with a declared payload length; payload bytes
/// are staged with [`write`](FrameSink::write) (possibly across several
/// reactor turns) and the frame goes on the wire when
/// [`finish`](FrameSink::finish) is called with the full length written. The owning
/// channel refuses a second sink until this one finishes or aborts; dropping
/// an unfinished sink leaves the slot occupied, which the next `send` reports
/// as [`Error::SinkInUse`].
pub struct FrameSink<'c> {
    channel: &'c mut Channel,
    kind: FrameKind,
    total: u64,
    staged: Vec<u8>,
}

impl<'c> FrameSink<'c> {
    pub(crate) fn new(channel: &'c mut Channel, kind: FrameKind, total: u64) -> Self {
        let capacity = usize::try_from(total).unwrap_or(0).min(64 * 1024);
        Self {
            channel,
            kind,
            total,
            staged: Vec::with_capacity(capacity),
        }
    }

    /// Logical type of the frame being written.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Bytes still owed before the frame can be finished.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.total - self.staged.len() as u64
    }

    /// Stage the next payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkOverflow`] if `data` would exceed the declared
    /// frame length; nothing is staged in that case.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let new_len = self.staged.len() as u64 + data.len() as u64;
        if new_len > self.total {
            return Err(Error::SinkOverflow {
                excess: new_len - self.total,
            });
        }
        self.staged.extend_from_slice(data);
        Ok(())
    }

    /// Encode the staged frame onto the channel's outbound buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteSink`] if fewer bytes were written than
    /// declared (the sink stays open), or an extension error if an outbound
    /// transform fails.
    pub fn finish(mut self) -> Result<()> {
        let remaining = self.remaining();
        if remaining > 0 {
            return Err(Error::IncompleteSink { remaining });
        }
        let payload = std::mem::take(&mut self.staged);
        self.channel.complete_sink(self.kind, payload)
    }

    /// Discard the staged frame and release the sink slot.
    pub fn abort(self) {
        self.channel.release_sink();
    }
}

/// Single-use read endpoint for one inbound frame or reassembled message.
///
/// Surfaced by [`Channel::receive`]. Data messages arrive fully reassembled
/// with [`kind`](FrameSource::kind) reporting the logical type of the first
/// fragment; ping and pong frames arrive immediately, even between fragments
/// of a data message.
#[derive(Debug)]
pub struct FrameSource {
    kind: FrameKind,
    payload: Vec<u8>,
    pos: usize,
}

impl FrameSource {
    pub(crate) fn new(kind: FrameKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            pos: 0,
        }
    }

    /// Logical type of the message.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Unread payload bytes.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        (self.payload.len() - self.pos) as u64
    }

    /// Copy the next payload bytes into `out`, returning how many were
    /// copied. Returns 0 once the payload is exhausted.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.payload.len() - self.pos);
        out[..n].copy_from_slice(&self.payload[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// The unread portion of the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload[self.pos..]
    }

    /// Take the remaining payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        if self.pos == 0 {
            self.payload
        } else {
            self.payload[self.pos..].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_read_in_pieces() {
        let mut src = FrameSource::new(FrameKind::Binary, vec![1, 2, 3, 4, 5]);
        assert_eq!(src.kind(), FrameKind::Binary);
        assert_eq!(src.remaining(), 5);

        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(src.remaining(), 3);

        let mut rest = [0u8; 8];
        assert_eq!(src.read(&mut rest), 3);
        assert_eq!(&rest[..3], &[3, 4, 5]);
        assert_eq!(src.remaining(), 0);
        assert_eq!(src.read(&mut rest), 0);
    }

    #[test]
    fn test_source_into_payload_after_partial_read() {
        let mut src = FrameSource::new(FrameKind::Text, b"hello".to_vec());
        let mut buf = [0u8; 2];
        src.read(&mut buf);
        assert_eq!(src.payload(), b"llo");
        assert_eq!(src.into_payload(), b"llo");
    }

    #[test]
    fn test_source_into_payload_untouched() {
        let src = FrameSource::new(FrameKind::Text, b"hello".to_vec());
        assert_eq!(src.into_payload(), b"hello");
    }
}
