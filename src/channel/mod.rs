//! Channel state machine and per-frame endpoints.
//!
//! One [`Channel`] exists per upgraded connection. It owns the connection
//! state, coordinates at most one in-flight frame per direction, drives the
//! close handshake, and holds the negotiated version, subprotocol, and
//! extension chain.

mod fragmenter;
mod frames;
mod role;
mod state;

#[allow(clippy::module_inception)]
mod channel;

pub use channel::{Channel, Incoming};
pub use fragmenter::Fragmenter;
pub use frames::{FrameSink, FrameSource};
pub use role::Role;
pub use state::ChannelState;
