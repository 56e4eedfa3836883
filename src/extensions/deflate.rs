//! permessage-deflate compression extension.
//!
//! Compresses data message payloads with raw deflate, signalled by RSV1 on
//! the first frame of a message. The four-byte `00 00 ff ff` flush trailer is
//! stripped on the wire and restored before inflating.

use std::io::Read;

use flate2::Compression;
use flate2::read::{DeflateDecoder, DeflateEncoder};

use crate::error::{Error, Result};
use crate::extensions::{ExtensionFactory, ExtensionParam, ExtensionStage};
use crate::protocol::FrameHeader;
use crate::protocol::frame::RSV1;

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;
const DEFAULT_WINDOW_BITS: u8 = 15;
const FLUSH_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Tuning for the deflate extension.
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// Compression level, 0-9.
    pub level: u32,
    /// Largest window the server will accept for its own direction.
    pub server_max_window_bits: u8,
    /// Largest window the server will accept from the client.
    pub client_max_window_bits: u8,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            level: 6,
            server_max_window_bits: DEFAULT_WINDOW_BITS,
            client_max_window_bits: DEFAULT_WINDOW_BITS,
        }
    }
}

impl DeflateConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compression level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for a level above 9.
    pub fn level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression level must be 0-9, got {level}"
            )));
        }
        self.level = level;
        Ok(self)
    }
}

fn parse_window_bits(value: Option<&str>) -> Result<u8> {
    let Some(s) = value else {
        return Ok(DEFAULT_WINDOW_BITS);
    };
    let bits: u8 = s
        .parse()
        .map_err(|_| Error::InvalidExtension(format!("Invalid window bits value: {s}")))?;
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::InvalidExtension(format!(
            "Window bits must be {MIN_WINDOW_BITS}-{MAX_WINDOW_BITS}, got {bits}"
        )));
    }
    Ok(bits)
}

/// Stateless factory registered with the negotiator.
pub struct DeflateFactory {
    config: DeflateConfig,
}

impl DeflateFactory {
    /// A factory with the given tuning.
    #[must_use]
    pub fn new(config: DeflateConfig) -> Self {
        Self { config }
    }

    /// A factory with default tuning.
    #[must_use]
    pub fn boxed() -> Box<dyn ExtensionFactory> {
        Box::new(Self::new(DeflateConfig::default()))
    }
}

impl ExtensionFactory for DeflateFactory {
    fn name(&self) -> &str {
        "permessage-deflate"
    }

    fn create(
        &self,
        params: &[ExtensionParam],
    ) -> Result<(Box<dyn ExtensionStage>, Vec<ExtensionParam>)> {
        let mut response = Vec::new();

        for param in params {
            match param.name.as_str() {
                // The stage compresses each message with a fresh context, so
                // both takeover restrictions hold trivially; confirm them.
                "server_no_context_takeover" => {
                    response.push(ExtensionParam::flag("server_no_context_takeover"));
                }
                "client_no_context_takeover" => {
                    response.push(ExtensionParam::flag("client_no_context_takeover"));
                }
                "server_max_window_bits" => {
                    let bits =
                        parse_window_bits(param.value.as_deref())?.min(self.config.server_max_window_bits);
                    response.push(ExtensionParam::new("server_max_window_bits", bits.to_string()));
                }
                "client_max_window_bits" => {
                    let bits =
                        parse_window_bits(param.value.as_deref())?.min(self.config.client_max_window_bits);
                    response.push(ExtensionParam::new("client_max_window_bits", bits.to_string()));
                }
                other => {
                    return Err(Error::InvalidExtension(format!(
                        "Unknown permessage-deflate parameter: {other}"
                    )));
                }
            }
        }

        let stage = DeflateStage {
            level: self.config.level,
        };
        Ok((Box::new(stage), response))
    }
}

/// Per-channel deflate stage.
pub struct DeflateStage {
    level: u32,
}

impl DeflateStage {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(data, Compression::new(self.level));
        let mut out = Vec::new();
        encoder
            .read_to_end(&mut out)
            .map_err(|e| Error::Extension(format!("deflate failed: {e}")))?;
        if out.ends_with(&FLUSH_TRAILER) {
            out.truncate(out.len() - FLUSH_TRAILER.len());
        }
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut restored = Vec::with_capacity(data.len() + FLUSH_TRAILER.len());
        restored.extend_from_slice(data);
        restored.extend_from_slice(&FLUSH_TRAILER);

        let mut decoder = DeflateDecoder::new(restored.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::Extension(format!("inflate failed: {e}")))?;
        Ok(out)
    }
}

impl ExtensionStage for DeflateStage {
    fn name(&self) -> &str {
        "permessage-deflate"
    }

    fn rsv_bits(&self) -> u8 {
        RSV1
    }

    fn encode(&mut self, header: &mut FrameHeader, payload: &mut Vec<u8>) -> Result<()> {
        if header.opcode.is_control() || payload.is_empty() {
            return Ok(());
        }
        *payload = self.compress(payload)?;
        header.rsv |= RSV1;
        Ok(())
    }

    fn decode(&mut self, header: &mut FrameHeader, payload: &mut Vec<u8>) -> Result<()> {
        if header.rsv & RSV1 == 0 {
            return Ok(());
        }
        if header.opcode.is_control() {
            return Err(Error::Extension("RSV1 set on a control frame".into()));
        }
        *payload = self.decompress(payload)?;
        header.rsv &= !RSV1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn stage() -> DeflateStage {
        DeflateStage { level: 6 }
    }

    fn data_header(len: u64) -> FrameHeader {
        FrameHeader::data(OpCode::Text, len, true)
    }

    #[test]
    fn test_roundtrip() {
        let mut s = stage();
        let original = b"the quick brown fox jumps over the lazy dog, twice over: \
                         the quick brown fox jumps over the lazy dog"
            .to_vec();

        let mut header = data_header(original.len() as u64);
        let mut payload = original.clone();
        s.encode(&mut header, &mut payload).unwrap();
        assert_eq!(header.rsv, RSV1);
        assert_ne!(payload, original);
        assert!(!payload.ends_with(&FLUSH_TRAILER));

        s.decode(&mut header, &mut payload).unwrap();
        assert_eq!(payload, original);
        assert_eq!(header.rsv, 0);
    }

    #[test]
    fn test_repetitive_payload_shrinks() {
        let mut s = stage();
        let original = vec![b'a'; 4096];
        let mut header = data_header(4096);
        let mut payload = original.clone();
        s.encode(&mut header, &mut payload).unwrap();
        assert!(payload.len() < original.len());
    }

    #[test]
    fn test_empty_payload_untouched() {
        let mut s = stage();
        let mut header = data_header(0);
        let mut payload = Vec::new();
        s.encode(&mut header, &mut payload).unwrap();
        assert_eq!(header.rsv, 0);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_control_frame_untouched() {
        let mut s = stage();
        let mut header = FrameHeader::control(OpCode::Ping, 4);
        let mut payload = b"ping".to_vec();
        s.encode(&mut header, &mut payload).unwrap();
        assert_eq!(header.rsv, 0);
        assert_eq!(payload, b"ping");
    }

    #[test]
    fn test_decode_without_rsv_is_passthrough() {
        let mut s = stage();
        let mut header = data_header(3);
        let mut payload = vec![1, 2, 3];
        s.decode(&mut header, &mut payload).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_rsv1_on_control_rejected() {
        let mut s = stage();
        let mut header = FrameHeader::control(OpCode::Ping, 1);
        header.rsv = RSV1;
        let mut payload = vec![0];
        assert!(matches!(
            s.decode(&mut header, &mut payload),
            Err(Error::Extension(_))
        ));
    }

    #[test]
    fn test_decode_corrupt_stream_fails() {
        let mut s = stage();
        let mut header = data_header(4);
        header.rsv = RSV1;
        let mut payload = vec![0xde, 0xad, 0xbe, 0xef];
        let err = s.decode(&mut header, &mut payload).unwrap_err();
        assert!(matches!(err, Error::Extension(_)));
        assert_eq!(err.close_code(), Some(1002));
    }

    #[test]
    fn test_factory_confirms_takeover_flags() {
        let factory = DeflateFactory::new(DeflateConfig::default());
        let (_, response) = factory
            .create(&[
                ExtensionParam::flag("server_no_context_takeover"),
                ExtensionParam::new("client_max_window_bits", "12"),
            ])
            .unwrap();
        assert!(response.iter().any(|p| p.name == "server_no_context_takeover"));
        assert!(response
            .iter()
            .any(|p| p.name == "client_max_window_bits" && p.value.as_deref() == Some("12")));
    }

    #[test]
    fn test_factory_rejects_unknown_param() {
        let factory = DeflateFactory::new(DeflateConfig::default());
        assert!(factory
            .create(&[ExtensionParam::flag("mystery_knob")])
            .is_err());
    }

    #[test]
    fn test_factory_rejects_bad_window_bits() {
        let factory = DeflateFactory::new(DeflateConfig::default());
        assert!(factory
            .create(&[ExtensionParam::new("client_max_window_bits", "16")])
            .is_err());
        assert!(factory
            .create(&[ExtensionParam::new("client_max_window_bits", "junk")])
            .is_err());
    }

    #[test]
    fn test_config_level_bounds() {
        assert!(DeflateConfig::new().level(9).is_ok());
        assert!(DeflateConfig::new().level(10).is_err());
    }
}
