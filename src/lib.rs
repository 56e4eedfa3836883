//! # hybi - Multi-draft WebSocket Protocol Engine
//!
//! `hybi` promotes a plain byte-stream connection to a message-framed,
//! full-duplex channel via the HTTP upgrade handshake, speaking four
//! historical draft versions (Hybi-00, -07, -08, -13) behind one channel
//! abstraction.
//!
//! ## Design
//!
//! - **Sans-io core**: the [`Channel`] state machine consumes and produces
//!   byte buffers; `receive()` returns `None` when more bytes are needed and
//!   the reactor re-invokes it on readiness. No hidden threads, no blocking.
//! - **Version polymorphism without inheritance**: [`ProtocolVersion`] is a
//!   closed enum carrying the per-draft predicates; Hybi-08/13 share the
//!   Hybi-07 codec.
//! - **Composable extensions**: an ordered [`extensions::ExtensionPipeline`]
//!   rewrites frame headers and payload bytes outbound in negotiation order
//!   and inbound in reverse, with compression (`permessage-deflate`) behind
//!   the `compression` feature.
//! - **Async adapter**: the `async-tokio` feature (default) provides
//!   [`ChannelDriver`] to pump a channel over any tokio stream.
//!
//! ## Quick start (server side)
//!
//! ```rust,ignore
//! use hybi::{Config, HandshakeProgress, Negotiator, UpgradeRequest};
//!
//! let negotiator = Negotiator::new(Config::default()).with_protocol("chat");
//! let request = UpgradeRequest::parse(&request_bytes)?;
//! if negotiator.matches(&request) {
//!     match negotiator.handshake(&request, body)? {
//!         HandshakeProgress::Complete { response, channel } => { /* ... */ }
//!         HandshakeProgress::NeedsBody { needed } => { /* buffer more */ }
//!     }
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod version;

#[cfg(feature = "async-tokio")]
pub mod codec;

pub use channel::{Channel, ChannelState, FrameSink, FrameSource, Incoming, Role};
pub use config::{Config, Limits, Timeouts};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, FrameKind};
pub use protocol::{
    HandshakeProgress, Negotiator, UpgradeRequest, WS_GUID, compute_accept_key,
};
pub use registry::ChannelRegistry;
pub use version::ProtocolVersion;

#[cfg(feature = "async-tokio")]
pub use codec::{ChannelDriver, DriverEvent};
