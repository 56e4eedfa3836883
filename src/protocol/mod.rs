//! Wire protocol core: header codecs, masking, handshake, reassembly.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod legacy;
pub mod mask;
pub mod opcode;
pub mod utf8;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use frame::{FrameHeader, MAX_CONTROL_PAYLOAD};
pub use handshake::{
    HandshakeProgress, Negotiator, UpgradeRequest, WS_GUID, compute_accept_key,
};
pub use mask::{MaskGenerator, apply_mask};
pub use opcode::OpCode;
pub use utf8::{Utf8Validator, validate_utf8};
