//! Configuration and resource limits for channels.

use std::time::Duration;

/// Resource limits enforced by a channel.
///
/// These bound memory usage per connection. `max_frame_size` also bounds the
/// terminator scan for legacy (Hybi-00) text frames, which carry no explicit
/// length on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single frame in bytes.
    ///
    /// Default: 16 MB.
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB.
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 128.
    pub max_fragment_count: usize,

    /// Maximum size of the handshake request in bytes.
    ///
    /// Default: 8 KB.
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Validate a frame payload size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size`
    /// exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_frame_size {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate an accumulated message size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if
    /// `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate a fragment count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`](crate::Error::TooManyFragments) if
    /// `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), crate::Error> {
        if count > self.max_fragment_count {
            Err(crate::Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate a handshake request size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge)
    /// if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration.
///
/// Enforcement is the caller's responsibility: the engine never blocks, so a
/// reactor that owns the connection applies these bounds and force-closes the
/// stream when a peer stalls (e.g. never echoes a close frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the upgrade handshake.
    /// Default: 30 seconds.
    pub handshake: Duration,

    /// Maximum time to wait for the peer's close echo.
    /// Default: 10 seconds.
    pub close: Duration,

    /// Maximum time a connection can remain idle.
    /// Default: 300 seconds.
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            close: Duration::from_secs(10),
            idle: Duration::from_secs(300),
        }
    }
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing data messages (in bytes).
    ///
    /// Messages larger than this are sliced into multiple frames.
    ///
    /// Default: 16 KB.
    pub fragment_size: usize,

    /// Answer inbound pings with an automatic pong.
    ///
    /// Disable when the application takes ownership of ping handling; pings
    /// are surfaced to the application either way.
    ///
    /// Default: true.
    pub auto_pong: bool,

    /// Timeout configuration, for callers that enforce deadlines.
    ///
    /// Default: None.
    pub timeouts: Option<Timeouts>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            auto_pong: true,
            timeouts: None,
        }
    }
}

impl Config {
    /// Create a configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the outgoing fragment size.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Enable or disable the automatic pong response.
    #[must_use]
    pub const fn with_auto_pong(mut self, auto: bool) -> Self {
        self.auto_pong = auto;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }
}
