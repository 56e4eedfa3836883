//! Tokio adapter.
//!
//! [`ChannelDriver`] pumps bytes between an `AsyncRead + AsyncWrite` stream
//! and a sans-io [`Channel`]: it drains the channel's outbound buffer to the
//! stream, feeds read bytes in, and turns the channel's events into owned
//! values. The channel still does all protocol work; this module only does
//! I/O.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::{Channel, Incoming};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, FrameKind};

const READ_CHUNK: usize = 8192;

/// Owned event delivered by [`ChannelDriver::next_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Vec<u8>),
    /// A ping; the pong answer has already been queued unless auto-pong is
    /// disabled.
    Ping(Vec<u8>),
    /// A pong.
    Pong(Vec<u8>),
    /// The peer's close frame.
    Close(Option<CloseFrame>),
}

/// Drives one channel over an async byte stream.
pub struct ChannelDriver<T> {
    io: T,
    channel: Channel,
    read_buf: Box<[u8]>,
}

impl<T> ChannelDriver<T> {
    /// Wrap a stream whose handshake already completed.
    #[must_use]
    pub fn new(io: T, channel: Channel) -> Self {
        Self {
            io,
            channel,
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Mutable access to the underlying channel.
    pub fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }

    /// Give back the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> ChannelDriver<T> {
    async fn flush_outbound(&mut self) -> Result<()> {
        if self.channel.has_outbound() {
            let buf = self.channel.take_outbound();
            self.io.write_all(&buf).await?;
            self.io.flush().await?;
        }
        Ok(())
    }

    /// Wait for the next event from the peer.
    ///
    /// Returns `Ok(None)` once the channel has fully closed and the stream
    /// can be dropped.
    ///
    /// # Errors
    ///
    /// Protocol violations from the channel (after its best-effort close
    /// frame has been flushed) and I/O errors from the stream. An EOF before
    /// the close handshake completed is reported as
    /// [`Error::ChannelClosed`].
    pub async fn next_event(&mut self) -> Result<Option<DriverEvent>> {
        loop {
            self.flush_outbound().await?;

            match self.channel.receive() {
                Ok(Some(incoming)) => {
                    // Push out whatever the state machine queued in response
                    // (pong, close echo) before handing the event up.
                    self.flush_outbound().await?;
                    return Ok(Some(Self::into_event(incoming)?));
                }
                Ok(None) => {
                    if self.channel.state().is_closed() {
                        return Ok(None);
                    }
                    let n = self.io.read(&mut self.read_buf).await?;
                    if n == 0 {
                        return if self.channel.state().is_closed() {
                            Ok(None)
                        } else {
                            Err(Error::ChannelClosed(None))
                        };
                    }
                    self.channel.feed(&self.read_buf[..n]);
                }
                Err(e) => {
                    let _ = self.flush_outbound().await;
                    return Err(e);
                }
            }
        }
    }

    fn into_event(incoming: Incoming) -> Result<DriverEvent> {
        Ok(match incoming {
            Incoming::Close(frame) => DriverEvent::Close(frame),
            Incoming::Source(source) => match source.kind() {
                FrameKind::Text => {
                    let text = String::from_utf8(source.into_payload())
                        .map_err(|_| Error::InvalidUtf8)?;
                    DriverEvent::Text(text)
                }
                FrameKind::Binary => DriverEvent::Binary(source.into_payload()),
                FrameKind::Ping => DriverEvent::Ping(source.into_payload()),
                FrameKind::Pong => DriverEvent::Pong(source.into_payload()),
            },
        })
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Channel send errors and I/O errors from the stream.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.channel.send_message(FrameKind::Text, text.as_bytes())?;
        self.flush_outbound().await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// Channel send errors and I/O errors from the stream.
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.channel.send_message(FrameKind::Binary, data)?;
        self.flush_outbound().await
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// Channel send errors and I/O errors from the stream.
    pub async fn ping(&mut self, data: &[u8]) -> Result<()> {
        self.channel.send_message(FrameKind::Ping, data)?;
        self.flush_outbound().await
    }

    /// Initiate the close handshake.
    ///
    /// # Errors
    ///
    /// Channel close errors and I/O errors from the stream.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        self.channel.send_close(code, reason)?;
        self.flush_outbound().await
    }
}
