//! Upgrade handshake negotiation.
//!
//! An inbound HTTP request enters the [`Negotiator`]; on match it computes
//! the version-specific accept token, selects a subprotocol and extension
//! chain, writes the 101 response, and constructs the [`Channel`] bound to
//! the negotiated draft. Any cryptographic or parsing failure aborts the
//! handshake without constructing a channel.
//!
//! The legacy draft needs eight raw body bytes (`key3`) that may not have
//! arrived with the headers; [`HandshakeProgress::NeedsBody`] defers
//! completion until the caller has buffered them.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use md5::Md5;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::channel::{Channel, Role};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extensions::{ExtensionFactory, ExtensionOffer, ExtensionPipeline};
use crate::version::ProtocolVersion;

/// GUID mixed into the Hybi-07+ accept key.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Body bytes the legacy challenge needs.
pub const LEGACY_KEY3_LEN: usize = 8;

/// Compute the `Sec-WebSocket-Accept` value for a client key.
///
/// # Example
///
/// ```
/// use hybi::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Extract the key number from a legacy `Sec-WebSocket-Key1`/`Key2` value.
///
/// The digit characters concatenate into an integer that is divided by the
/// number of space characters. A key with no spaces, with a quotient that
/// does not divide evenly, or with a result outside 32 bits is malformed.
///
/// # Errors
///
/// Returns [`Error::InvalidHandshake`] for any of the malformed shapes above.
pub fn decode_legacy_key(key: &str) -> Result<u32> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    let spaces = key.chars().filter(|&c| c == ' ').count();

    if spaces == 0 {
        return Err(Error::InvalidHandshake(
            "Legacy key contains no spaces".into(),
        ));
    }
    let number: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidHandshake("Legacy key contains no usable digits".into()))?;
    if number % spaces as u64 != 0 {
        return Err(Error::InvalidHandshake(
            "Legacy key number is not a multiple of its space count".into(),
        ));
    }
    u32::try_from(number / spaces as u64)
        .map_err(|_| Error::InvalidHandshake("Legacy key number out of range".into()))
}

/// Compute the 16-byte legacy challenge response.
///
/// # Errors
///
/// Propagates key decoding failures; `key3` must be exactly eight bytes.
pub fn legacy_challenge(key1: &str, key2: &str, key3: &[u8]) -> Result<[u8; 16]> {
    debug_assert_eq!(key3.len(), LEGACY_KEY3_LEN);
    let mut hasher = Md5::new();
    hasher.update(decode_legacy_key(key1)?.to_be_bytes());
    hasher.update(decode_legacy_key(key2)?.to_be_bytes());
    hasher.update(key3);
    Ok(hasher.finalize().into())
}

/// Security-critical headers that must not be duplicated.
const SINGLETON_HEADERS: [&str; 7] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-key1",
    "sec-websocket-key2",
    "sec-websocket-version",
];

fn parse_headers<'a, I>(lines: I) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_lowercase();
            if SINGLETON_HEADERS.contains(&name.as_str()) && headers.contains_key(&name) {
                return Err(Error::InvalidHandshake(format!("Duplicate header: {name}")));
            }
            headers.insert(name, value.trim().to_string());
        }
    }
    Ok(headers)
}

fn validate_header_value(header: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Parsed upgrade request, covering both key styles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request path.
    pub path: String,
    /// Host header value.
    pub host: String,
    /// `Sec-WebSocket-Key` (Hybi-07+).
    pub key: Option<String>,
    /// `Sec-WebSocket-Key1` (legacy).
    pub key1: Option<String>,
    /// `Sec-WebSocket-Key2` (legacy).
    pub key2: Option<String>,
    /// `Sec-WebSocket-Version`, absent on legacy requests.
    pub version: Option<u8>,
    /// Origin header value.
    pub origin: Option<String>,
    /// Offered subprotocols, in the client's preference order.
    pub protocols: Vec<String>,
    /// Raw extension offer entries from `Sec-WebSocket-Extensions`.
    pub extensions: Vec<String>,
}

impl UpgradeRequest {
    /// Parse an upgrade request from raw HTTP header bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the request is not a GET over
    /// HTTP/1.1, lacks the upgrade headers, carries neither key style, or
    /// duplicates a security-critical header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Request is not valid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let (method, path, http) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(h), None) => (m, p, h),
            _ => return Err(Error::InvalidHandshake("Malformed request line".into())),
        };
        if method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Upgrade requires GET, got {method}"
            )));
        }
        if !http.starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "Upgrade requires HTTP/1.1, got {http}"
            )));
        }

        let headers = parse_headers(lines)?;

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {upgrade}"
            )));
        }
        let connection = headers
            .get("connection")
            .ok_or_else(|| Error::InvalidHandshake("Missing Connection header".into()))?;
        if !connection.to_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }
        let host = headers
            .get("host")
            .ok_or_else(|| Error::InvalidHandshake("Missing Host header".into()))?
            .clone();

        let key = headers.get("sec-websocket-key").cloned();
        let key1 = headers.get("sec-websocket-key1").cloned();
        let key2 = headers.get("sec-websocket-key2").cloned();
        if key.is_none() && (key1.is_none() || key2.is_none()) {
            return Err(Error::InvalidHandshake(
                "Request carries neither Sec-WebSocket-Key nor Key1/Key2".into(),
            ));
        }

        let version = match headers.get("sec-websocket-version") {
            Some(v) => Some(v.parse::<u8>().map_err(|_| {
                Error::InvalidHandshake(format!("Invalid Sec-WebSocket-Version: {v}"))
            })?),
            None => None,
        };

        let split_list = |name: &str| -> Vec<String> {
            headers
                .get(name)
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default()
        };

        Ok(Self {
            path: path.to_string(),
            host,
            key,
            key1,
            key2,
            version,
            origin: headers.get("origin").cloned(),
            protocols: split_list("sec-websocket-protocol"),
            extensions: split_list("sec-websocket-extensions"),
        })
    }

    /// Parse with a size limit applied first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] when `data` exceeds `max_size`,
    /// otherwise as [`UpgradeRequest::parse`].
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }
}

/// Outcome of one handshake attempt.
#[derive(Debug)]
pub enum HandshakeProgress {
    /// Negotiation succeeded: write `response` to the stream and hand the
    /// channel to the application.
    Complete {
        /// Full 101 response, including the legacy digest body when present.
        response: Vec<u8>,
        /// The channel bound to the negotiated draft.
        channel: Box<Channel>,
    },
    /// A legacy handshake is waiting for `key3` body bytes; re-invoke
    /// [`Negotiator::handshake`] once `needed` more bytes have arrived.
    NeedsBody {
        /// Additional body bytes required.
        needed: usize,
    },
}

/// Server-side handshake negotiator.
///
/// Holds the supported subprotocols and the stateless extension factories;
/// each successful handshake instantiates fresh per-channel extension stages.
pub struct Negotiator {
    config: Config,
    protocols: Vec<String>,
    factories: Vec<Box<dyn ExtensionFactory>>,
}

impl Negotiator {
    /// Create a negotiator with no subprotocols or extensions registered.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            protocols: Vec::new(),
            factories: Vec::new(),
        }
    }

    /// Register a supported subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Register an extension factory.
    #[must_use]
    pub fn with_extension(mut self, factory: Box<dyn ExtensionFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Whether any supported draft version matches the request.
    #[must_use]
    pub fn matches(&self, request: &UpgradeRequest) -> bool {
        ProtocolVersion::select(request).is_some()
    }

    /// Run the handshake against a parsed request.
    ///
    /// `body` holds any request body bytes buffered so far; only the legacy
    /// draft consumes them (exactly [`LEGACY_KEY3_LEN`]).
    ///
    /// # Errors
    ///
    /// Returns a negotiation error if no version matches or the keys are
    /// malformed. No channel is constructed on failure; the caller closes
    /// the underlying stream.
    pub fn handshake(&self, request: &UpgradeRequest, body: &[u8]) -> Result<HandshakeProgress> {
        let version = ProtocolVersion::select(request)
            .ok_or(Error::UnsupportedVersion(request.version))?;

        // Intersect in the client's preference order; no overlap is not fatal.
        let subprotocol = request
            .protocols
            .iter()
            .find(|p| self.protocols.iter().any(|s| s == *p))
            .cloned();
        if let Some(ref proto) = subprotocol {
            validate_header_value("Sec-WebSocket-Protocol", proto)?;
        }

        let (pipeline, accepted) = if version.supports_extensions() {
            self.negotiate_extensions(&request.extensions)?
        } else {
            (ExtensionPipeline::empty(), Vec::new())
        };

        let response = match version {
            ProtocolVersion::V00 => {
                let key1 = request.key1.as_deref().expect("V00 selected");
                let key2 = request.key2.as_deref().expect("V00 selected");
                if body.len() < LEGACY_KEY3_LEN {
                    return Ok(HandshakeProgress::NeedsBody {
                        needed: LEGACY_KEY3_LEN - body.len(),
                    });
                }
                let digest = legacy_challenge(key1, key2, &body[..LEGACY_KEY3_LEN])?;
                self.write_legacy_response(request, subprotocol.as_deref(), &digest)?
            }
            _ => {
                let key = request.key.as_deref().expect("hybi selected");
                let accept = compute_accept_key(key);
                self.write_hybi_response(&accept, subprotocol.as_deref(), &accepted)?
            }
        };

        debug!(
            version = %version,
            subprotocol = subprotocol.as_deref().unwrap_or("-"),
            extensions = pipeline.len(),
            "handshake negotiated"
        );

        let channel = Channel::with_negotiated(
            version,
            Role::Server,
            self.config.clone(),
            subprotocol,
            pipeline,
        );

        Ok(HandshakeProgress::Complete {
            response,
            channel: Box::new(channel),
        })
    }

    /// Instantiate recognized extension factories in request order.
    ///
    /// Unrecognized names are dropped, not rejected; a factory that refuses
    /// the offered parameters is dropped the same way.
    fn negotiate_extensions(
        &self,
        entries: &[String],
    ) -> Result<(ExtensionPipeline, Vec<ExtensionOffer>)> {
        let mut stages = Vec::new();
        let mut accepted = Vec::new();

        for entry in entries {
            let offer = ExtensionOffer::parse(entry)?;
            let Some(factory) = self.factories.iter().find(|f| f.name() == offer.name) else {
                debug!(extension = %offer.name, "extension not recognized, dropped");
                continue;
            };
            match factory.create(&offer.params) {
                Ok((stage, response_params)) => {
                    accepted.push(ExtensionOffer::with_params(
                        offer.name.clone(),
                        response_params,
                    ));
                    stages.push(stage);
                }
                Err(e) => {
                    warn!(extension = %offer.name, error = %e, "extension offer refused, dropped");
                }
            }
        }

        Ok((ExtensionPipeline::new(stages)?, accepted))
    }

    fn write_hybi_response(
        &self,
        accept: &str,
        subprotocol: Option<&str>,
        extensions: &[ExtensionOffer],
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(192);
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {accept}\r\n").as_bytes());
        if let Some(proto) = subprotocol {
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {proto}\r\n").as_bytes());
        }
        if !extensions.is_empty() {
            let header = extensions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            validate_header_value("Sec-WebSocket-Extensions", &header)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Extensions: {header}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(buf)
    }

    fn write_legacy_response(
        &self,
        request: &UpgradeRequest,
        subprotocol: Option<&str>,
        digest: &[u8; 16],
    ) -> Result<Vec<u8>> {
        let origin = request.origin.as_deref().unwrap_or("");
        validate_header_value("Sec-WebSocket-Origin", origin)?;
        validate_header_value("Sec-WebSocket-Location", &request.host)?;
        validate_header_value("Sec-WebSocket-Location", &request.path)?;

        let mut buf = Vec::with_capacity(224);
        buf.extend_from_slice(b"HTTP/1.1 101 WebSocket Protocol Handshake\r\n");
        buf.extend_from_slice(b"Upgrade: WebSocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Origin: {origin}\r\n").as_bytes());
        buf.extend_from_slice(
            format!("Sec-WebSocket-Location: ws://{}{}\r\n", request.host, request.path)
                .as_bytes(),
        );
        if let Some(proto) = subprotocol {
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {proto}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        // The body is the raw 16-byte digest, nothing more.
        buf.extend_from_slice(digest);
        Ok(buf)
    }
}
