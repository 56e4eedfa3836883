//! The per-connection channel state machine.
//!
//! A channel is sans-io: the reactor pushes received bytes in with
//! [`Channel::feed`] and drains bytes to write with
//! [`Channel::take_outbound`]; the channel itself never touches a socket.
//! [`Channel::receive`] returns `Ok(None)` when no complete frame is
//! buffered (the sole suspension point) and the caller re-invokes it when
//! the stream signals readability.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::channel::frames::{FrameSink, FrameSource};
use crate::channel::{ChannelState, Role};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extensions::ExtensionPipeline;
use crate::message::{CloseCode, CloseFrame, FrameKind};
use crate::protocol::assembler::MessageAssembler;
use crate::protocol::frame::MAX_CONTROL_PAYLOAD;
use crate::protocol::mask::{MaskGenerator, apply_mask};
use crate::protocol::utf8::validate_utf8;
use crate::protocol::{FrameHeader, OpCode, legacy};
use crate::version::ProtocolVersion;

/// Something the channel surfaced to the application.
#[derive(Debug)]
pub enum Incoming {
    /// A data message or a ping/pong control frame.
    Source(FrameSource),
    /// The close handshake progressed; the frame is the peer's close, if it
    /// carried a status code.
    Close(Option<CloseFrame>),
}

/// Inbound decode progress for the Hybi framing.
#[derive(Debug)]
enum ReadStage {
    /// Waiting for the next frame header.
    Idle,
    /// Header decoded; payload bytes still arriving. Unmasking happens
    /// incrementally, so `received` tracks the key phase across partial
    /// reads.
    Payload {
        header: FrameHeader,
        received: usize,
        buf: Vec<u8>,
    },
}

/// One upgraded connection.
#[derive(Debug)]
pub struct Channel {
    version: ProtocolVersion,
    role: Role,
    config: Config,
    state: ChannelState,
    subprotocol: Option<String>,
    extensions: ExtensionPipeline,
    inbound: BytesMut,
    outbound: BytesMut,
    read: ReadStage,
    assembler: MessageAssembler,
    mask_gen: MaskGenerator,
    sink_open: bool,
    failed: bool,
    failure_code: Option<u16>,
}

impl Channel {
    /// Create a channel with no subprotocol and no extensions.
    #[must_use]
    pub fn new(version: ProtocolVersion, role: Role, config: Config) -> Self {
        Self::with_negotiated(version, role, config, None, ExtensionPipeline::empty())
    }

    /// Create a channel from a completed negotiation.
    #[must_use]
    pub fn with_negotiated(
        version: ProtocolVersion,
        role: Role,
        config: Config,
        subprotocol: Option<String>,
        extensions: ExtensionPipeline,
    ) -> Self {
        let assembler = MessageAssembler::new(config.limits.clone());
        Self {
            version,
            role,
            config,
            state: ChannelState::Open,
            subprotocol,
            extensions,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            read: ReadStage::Idle,
            assembler,
            mask_gen: MaskGenerator::new(),
            sink_open: false,
            failed: false,
            failure_code: None,
        }
    }

    /// Negotiated draft version.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// This side's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Negotiated subprotocol, if any.
    #[must_use]
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Whether data frames may still be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open && !self.failed
    }

    /// Push bytes read from the underlying stream.
    pub fn feed(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    /// Drain the bytes the channel wants written to the stream.
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    /// Whether encoded bytes are waiting to be written.
    #[must_use]
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Dispatch the next inbound frame or message.
    ///
    /// Returns `Ok(None)` when the buffered bytes do not yet form a complete
    /// frame (or when the channel is closed); the caller re-invokes once more
    /// bytes have been fed. Fragmented data messages are surfaced only when
    /// complete; ping/pong frames are surfaced immediately, even between
    /// fragments.
    ///
    /// # Errors
    ///
    /// A protocol violation queues a best-effort close frame, forces the
    /// channel to `Closed`, and is returned exactly once; later calls report
    /// [`Error::ChannelClosed`].
    pub fn receive(&mut self) -> Result<Option<Incoming>> {
        if self.failed {
            return Err(Error::ChannelClosed(self.failure_code));
        }
        if !self.state.can_receive() {
            return Ok(None);
        }

        let polled = if self.version.is_legacy() {
            self.poll_legacy()
        } else {
            self.poll_hybi()
        };
        polled.map_err(|e| self.fail(e))
    }

    /// Open a sink for one outbound frame of `len` payload bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`] if the channel is not open
    /// - [`Error::SinkInUse`] while a previous sink has not finished
    /// - [`Error::ControlFrameTooLarge`] for a control frame above 125 bytes
    /// - [`Error::FrameTooLarge`] above the configured frame limit
    /// - [`Error::ProtocolViolation`] for kinds the legacy wire cannot carry
    pub fn send(&mut self, kind: FrameKind, len: u64) -> Result<FrameSink<'_>> {
        self.check_sendable(kind)?;
        if kind.is_control() && len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(Error::ControlFrameTooLarge(len as usize));
        }
        let len_usize =
            usize::try_from(len).map_err(|_| Error::FrameTooLarge {
                size: usize::MAX,
                max: self.config.limits.max_frame_size,
            })?;
        self.config.limits.check_frame_size(len_usize)?;

        self.sink_open = true;
        Ok(FrameSink::new(self, kind, len))
    }

    /// Send a whole message, slicing data payloads into frames per the
    /// configured fragment size.
    ///
    /// # Errors
    ///
    /// As [`Channel::send`], plus [`Error::MessageTooLarge`] and
    /// [`Error::InvalidUtf8`] for a text payload that is not UTF-8.
    pub fn send_message(&mut self, kind: FrameKind, payload: &[u8]) -> Result<()> {
        self.check_sendable(kind)?;

        if kind.is_control() {
            if payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(payload.len()));
            }
            self.write_control(kind.opcode(), payload);
            return Ok(());
        }

        self.config.limits.check_message_size(payload.len())?;
        if kind == FrameKind::Text {
            validate_utf8(payload)?;
        }

        if self.version.is_legacy() {
            legacy::encode_text(payload, &mut self.outbound);
            return Ok(());
        }

        // Extensions transform the whole message before it is sliced; the
        // first frame carries the reserved bits.
        let mut rsv = 0;
        let mut transformed;
        let body: &[u8] = if self.extensions.is_empty() {
            payload
        } else {
            let mut header = FrameHeader::data(kind.opcode(), payload.len() as u64, true);
            transformed = payload.to_vec();
            self.extensions.encode(&mut header, &mut transformed)?;
            rsv = header.rsv;
            &transformed
        };

        let fragment_size = self.config.fragment_size;
        let chunks: Vec<(OpCode, bool, &[u8])> =
            crate::channel::fragmenter::Fragmenter::new(body, kind.opcode(), fragment_size)
                .collect();
        for (opcode, fin, chunk) in chunks {
            let frame_rsv = if opcode == OpCode::Continuation { 0 } else { rsv };
            self.write_frame(opcode, fin, frame_rsv, chunk);
        }
        Ok(())
    }

    /// Initiate the close handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`] if the channel is not open; callers must
    ///   not close twice
    /// - [`Error::InvalidCloseCode`] for a reserved or out-of-range code
    /// - [`Error::ProtocolViolation`] for a legacy close with a reason (the
    ///   legacy close frame carries no payload)
    pub fn send_close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.failed {
            return Err(Error::ChannelClosed(self.failure_code));
        }
        if self.state != ChannelState::Open {
            return Err(Error::ChannelClosed(None));
        }
        if self.sink_open {
            return Err(Error::SinkInUse);
        }

        if self.version.is_legacy() {
            if !reason.is_empty() {
                return Err(Error::ProtocolViolation(
                    "Legacy close frame cannot carry a payload".into(),
                ));
            }
            legacy::encode_close(&mut self.outbound);
        } else {
            if !code.is_sendable() {
                return Err(Error::InvalidCloseCode(code.as_u16()));
            }
            let mut payload = code.as_u16().to_be_bytes().to_vec();
            payload.extend_from_slice(reason.as_bytes());
            if payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(payload.len()));
            }
            self.write_control(OpCode::Close, &payload);
        }

        debug!(code = code.as_u16(), "close frame sent");
        self.state = ChannelState::SentClose;
        Ok(())
    }

    fn check_sendable(&self, kind: FrameKind) -> Result<()> {
        if self.failed {
            return Err(Error::ChannelClosed(self.failure_code));
        }
        if !self.state.can_send() {
            return Err(Error::ChannelClosed(None));
        }
        if self.sink_open {
            return Err(Error::SinkInUse);
        }
        if self.version.is_legacy() && kind != FrameKind::Text {
            return Err(Error::ProtocolViolation(format!(
                "The legacy wire cannot carry {kind} frames"
            )));
        }
        Ok(())
    }

    /// Encode a staged sink frame. Called by [`FrameSink::finish`].
    pub(crate) fn complete_sink(&mut self, kind: FrameKind, mut payload: Vec<u8>) -> Result<()> {
        self.sink_open = false;

        if self.version.is_legacy() {
            validate_utf8(&payload)?;
            legacy::encode_text(&payload, &mut self.outbound);
            return Ok(());
        }

        if kind.is_control() {
            self.write_control(kind.opcode(), &payload);
            return Ok(());
        }

        if kind == FrameKind::Text {
            validate_utf8(&payload)?;
        }
        let mut header = FrameHeader::data(kind.opcode(), payload.len() as u64, true);
        self.extensions.encode(&mut header, &mut payload)?;
        self.write_frame(header.opcode, true, header.rsv, &payload);
        Ok(())
    }

    /// Release the sink slot without writing. Called by [`FrameSink::abort`].
    pub(crate) fn release_sink(&mut self) {
        self.sink_open = false;
    }

    fn write_control(&mut self, opcode: OpCode, payload: &[u8]) {
        debug_assert!(payload.len() <= MAX_CONTROL_PAYLOAD);
        self.write_frame(opcode, true, 0, payload);
    }

    fn write_frame(&mut self, opcode: OpCode, fin: bool, rsv: u8, payload: &[u8]) {
        let mut header = FrameHeader {
            opcode,
            fin,
            rsv,
            payload_len: payload.len() as u64,
            mask: None,
        };
        if self.version.masking_required(self.role) {
            header.mask = Some(self.mask_gen.next_key());
        }
        header.encode(&mut self.outbound);
        let start = self.outbound.len();
        self.outbound.extend_from_slice(payload);
        if let Some(key) = header.mask {
            apply_mask(&mut self.outbound[start..], key, 0);
        }
        trace!(%opcode, fin, len = payload.len(), "frame queued");
    }

    fn poll_hybi(&mut self) -> Result<Option<Incoming>> {
        loop {
            match self.read {
                ReadStage::Idle => {
                    let (header, consumed) = match FrameHeader::decode(&self.inbound) {
                        Ok(decoded) => decoded,
                        Err(Error::Incomplete { .. }) => return Ok(None),
                        Err(e) => return Err(e),
                    };

                    match self.role {
                        Role::Server if !header.masked() => {
                            return Err(Error::UnmaskedClientFrame);
                        }
                        Role::Client if header.masked() => {
                            return Err(Error::MaskedServerFrame);
                        }
                        _ => {}
                    }
                    if header.rsv & !self.extensions.claimed_rsv() != 0 {
                        return Err(Error::UnclaimedRsvBits(header.rsv));
                    }
                    header.validate()?;
                    let len = usize::try_from(header.payload_len).map_err(|_| {
                        Error::FrameTooLarge {
                            size: usize::MAX,
                            max: self.config.limits.max_frame_size,
                        }
                    })?;
                    self.config.limits.check_frame_size(len)?;

                    self.inbound.advance(consumed);
                    self.read = ReadStage::Payload {
                        header,
                        received: 0,
                        buf: Vec::with_capacity(len.min(64 * 1024)),
                    };
                }
                ReadStage::Payload { .. } => {
                    let ReadStage::Payload {
                        header,
                        mut received,
                        mut buf,
                    } = std::mem::replace(&mut self.read, ReadStage::Idle)
                    else {
                        unreachable!();
                    };

                    let total = header.payload_len as usize;
                    let take = (total - received).min(self.inbound.len());
                    if take > 0 {
                        let mut chunk = self.inbound.split_to(take);
                        if let Some(key) = header.mask {
                            // The key phase follows the running position, not
                            // this read's start.
                            apply_mask(&mut chunk, key, received);
                        }
                        buf.extend_from_slice(&chunk);
                        received += take;
                    }
                    if received < total {
                        self.read = ReadStage::Payload {
                            header,
                            received,
                            buf,
                        };
                        return Ok(None);
                    }

                    if let Some(incoming) = self.process_frame(header, buf)? {
                        return Ok(Some(incoming));
                    }
                }
            }
        }
    }

    fn process_frame(&mut self, header: FrameHeader, payload: Vec<u8>) -> Result<Option<Incoming>> {
        match header.opcode {
            OpCode::Ping => {
                if self.config.auto_pong && self.state == ChannelState::Open {
                    self.write_control(OpCode::Pong, &payload);
                }
                Ok(Some(Incoming::Source(FrameSource::new(
                    FrameKind::Ping,
                    payload,
                ))))
            }
            OpCode::Pong => Ok(Some(Incoming::Source(FrameSource::new(
                FrameKind::Pong,
                payload,
            )))),
            OpCode::Close => self.process_close(&payload).map(Some),
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                let Some(mut message) =
                    self.assembler
                        .push(header.opcode, header.fin, header.rsv, &payload)?
                else {
                    return Ok(None);
                };

                if message.rsv != 0 {
                    let mut msg_header =
                        FrameHeader::data(message.kind.opcode(), message.payload.len() as u64, true);
                    msg_header.rsv = message.rsv;
                    let mut body = std::mem::take(&mut message.payload);
                    self.extensions.decode(&mut msg_header, &mut body)?;
                    // Text was checked against the wire bytes only when no
                    // extension rewrote them.
                    if message.kind == FrameKind::Text {
                        validate_utf8(&body)?;
                    }
                    self.config.limits.check_message_size(body.len())?;
                    message.payload = body;
                }

                Ok(Some(Incoming::Source(FrameSource::new(
                    message.kind,
                    message.payload,
                ))))
            }
        }
    }

    fn process_close(&mut self, payload: &[u8]) -> Result<Incoming> {
        let frame = match payload.len() {
            0 => None,
            1 => {
                return Err(Error::ProtocolViolation(
                    "Close frame with a one-byte payload".into(),
                ));
            }
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let close_code = CloseCode::from_u16(code);
                if !close_code.is_sendable() {
                    return Err(Error::InvalidCloseCode(code));
                }
                let reason = std::str::from_utf8(&payload[2..])?;
                Some(CloseFrame::new(close_code, reason))
            }
        };

        match self.state {
            ChannelState::Open => {
                // Echo a close with the same status code, then both
                // directions have closed.
                self.state = ChannelState::ReceivedClose;
                let echo: Vec<u8> = frame
                    .as_ref()
                    .map(|f| f.code.as_u16().to_be_bytes().to_vec())
                    .unwrap_or_default();
                self.write_control(OpCode::Close, &echo);
                self.state = ChannelState::Closed;
            }
            ChannelState::SentClose => {
                self.state = ChannelState::Closed;
            }
            ChannelState::ReceivedClose | ChannelState::Closed => {}
        }
        debug!(code = frame.as_ref().map(|f| f.code.as_u16()), "close handshake complete");
        Ok(Incoming::Close(frame))
    }

    fn poll_legacy(&mut self) -> Result<Option<Incoming>> {
        let Some((frame, consumed)) =
            legacy::decode(&self.inbound, self.config.limits.max_frame_size)?
        else {
            return Ok(None);
        };
        self.inbound.advance(consumed);

        match frame {
            legacy::LegacyFrame::Text(payload) => {
                self.config.limits.check_message_size(payload.len())?;
                validate_utf8(&payload)?;
                Ok(Some(Incoming::Source(FrameSource::new(
                    FrameKind::Text,
                    payload,
                ))))
            }
            legacy::LegacyFrame::Close => {
                match self.state {
                    ChannelState::Open => {
                        self.state = ChannelState::ReceivedClose;
                        legacy::encode_close(&mut self.outbound);
                        self.state = ChannelState::Closed;
                    }
                    ChannelState::SentClose => {
                        self.state = ChannelState::Closed;
                    }
                    ChannelState::ReceivedClose | ChannelState::Closed => {}
                }
                Ok(Some(Incoming::Close(None)))
            }
        }
    }

    /// Record a fatal error: queue a best-effort close frame while the
    /// stream is still writable, force `Closed`, and make sure the error is
    /// surfaced exactly once.
    fn fail(&mut self, err: Error) -> Error {
        if self.failed {
            return err;
        }
        self.failed = true;
        self.failure_code = err.close_code();

        if self.state != ChannelState::Closed {
            if let Some(code) = self.failure_code {
                if self.version.is_legacy() {
                    legacy::encode_close(&mut self.outbound);
                } else {
                    self.write_control(OpCode::Close, &code.to_be_bytes());
                }
            }
            self.state = ChannelState::Closed;
        }
        warn!(error = %err, "channel failed");
        err
    }
}
