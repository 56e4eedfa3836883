//! Error types for the protocol engine.
//!
//! Every failure mode the engine can report lives here. Negotiation errors
//! abort the handshake before a channel exists; protocol violations carry
//! enough information for the channel to pick the close status code it sends
//! before tearing the connection down.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during handshake negotiation or frame exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Not enough buffered bytes to decode a complete frame header.
    #[error("Incomplete frame: need {needed} more bytes")]
    Incomplete {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Opcode value outside the 4-bit range.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Opcode reserved for future protocol revisions.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// 64-bit payload length with the high bit set.
    #[error("Invalid payload length: {0:#x} (high bit must be zero)")]
    InvalidPayloadLength(u64),

    /// Control frame with FIN cleared.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload above the 125-byte ceiling.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Server-role channel received a frame without a mask key.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Client-role channel received a masked frame.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// RSV bits set that no negotiated extension claimed.
    #[error("Unclaimed reserved bits set: {0:#05b}")]
    UnclaimedRsvBits(u8),

    /// Text payload is not valid UTF-8.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Generic framing-level protocol violation.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Frame size exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message size exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Handshake request exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual handshake size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Malformed or non-upgradable handshake request.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// No supported draft version matches the request.
    #[error("Unsupported WebSocket version: {0:?}")]
    UnsupportedVersion(Option<u8>),

    /// Header value that would corrupt the response if echoed.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Close status code outside the sendable ranges.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Extension failed to transform a frame.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Malformed extension offer or parameters.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// A frame sink for this direction is already open.
    #[error("A frame sink is already open on this channel")]
    SinkInUse,

    /// Sink finished before the declared length was written.
    #[error("Frame sink finished with {remaining} bytes unwritten")]
    IncompleteSink {
        /// Bytes still owed to the frame.
        remaining: u64,
    },

    /// Sink received more bytes than the declared length.
    #[error("Frame sink overflow: {excess} bytes past the declared length")]
    SinkOverflow {
        /// Bytes past the declared frame length.
        excess: u64,
    },

    /// The channel is no longer open.
    #[error("Channel closed: {0:?}")]
    ChannelClosed(Option<u16>),

    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Close status code the channel should attempt to send for this error.
    ///
    /// `None` means the failure carries no wire-level status (I/O errors,
    /// caller programming errors).
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::InvalidUtf8 => Some(1007),
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. } => Some(1009),
            Error::InvalidOpcode(_)
            | Error::ReservedOpcode(_)
            | Error::InvalidPayloadLength(_)
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::UnmaskedClientFrame
            | Error::MaskedServerFrame
            | Error::UnclaimedRsvBits(_)
            | Error::InvalidCloseCode(_)
            | Error::Extension(_)
            | Error::ProtocolViolation(_) => Some(1002),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
