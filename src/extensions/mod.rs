//! Wire extension framework.
//!
//! Extensions are negotiated during the handshake and then sit on the frame
//! path: each outbound frame runs through the negotiated stages in order
//! before its header is finalized, each inbound frame runs through them in
//! reverse order after header parsing. A stage may rewrite the payload and
//! set or clear the reserved bit it claims.
//!
//! The split between [`ExtensionFactory`] and [`ExtensionStage`] is the
//! statelessness boundary: a factory is shared and immutable, while codec
//! state (e.g. a compression window) lives only in the per-channel stage.

#[cfg(feature = "compression")]
pub mod deflate;

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::FrameHeader;

/// One parameter of an extension offer, e.g. `client_max_window_bits=15` or
/// the bare flag `server_no_context_takeover`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name.
    pub name: String,
    /// Parameter value; `None` for flag parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// A parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// A flag parameter.
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse `name`, `name=value`, or `name="value"`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().split_once('=') {
            Some((name, value)) => Self {
                name: name.trim().to_string(),
                value: Some(value.trim().trim_matches('"').to_string()),
            },
            None => Self::flag(s.trim()),
        }
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One entry of a `Sec-WebSocket-Extensions` header: a name plus parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name.
    pub name: String,
    /// Offered parameters.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// An offer with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// An offer with parameters.
    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse one entry: `extension-name; p1=v1; p2`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for an empty name.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default().trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidExtension("Empty extension name".into()));
        }
        Ok(Self {
            name,
            params: parts.map(ExtensionParam::parse).collect(),
        })
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {param}")?;
        }
        Ok(())
    }
}

/// Stateless extension factory, registered with the negotiator.
pub trait ExtensionFactory: Send + Sync {
    /// Name as it appears in `Sec-WebSocket-Extensions`.
    fn name(&self) -> &str;

    /// Instantiate a per-channel stage from an offer's parameters.
    ///
    /// Returns the stage and the parameters to confirm in the server's
    /// response header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] to refuse the offer; the
    /// negotiator then drops the extension rather than failing the
    /// handshake.
    fn create(
        &self,
        params: &[ExtensionParam],
    ) -> Result<(Box<dyn ExtensionStage>, Vec<ExtensionParam>)>;
}

/// A negotiated extension bound to one channel.
///
/// Stages own their codec state exclusively; no two frames of a channel are
/// processed concurrently within one stage, and state is never shared across
/// channels.
pub trait ExtensionStage: Send {
    /// Extension name, for diagnostics.
    fn name(&self) -> &str;

    /// RSV bits this stage claims (`RSV1 | RSV2 | RSV3` from
    /// [`crate::protocol::frame`]).
    fn rsv_bits(&self) -> u8 {
        0
    }

    /// Transform an outbound frame before its header is finalized.
    ///
    /// May rewrite `payload` and set the stage's reserved bit in `header`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] on a transform failure; the channel
    /// treats this as fatal.
    fn encode(&mut self, header: &mut FrameHeader, payload: &mut Vec<u8>) -> Result<()>;

    /// Transform an inbound frame after header parsing.
    ///
    /// Must clear the stage's reserved bit once consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] on a corrupt stream; the channel aborts
    /// with close code 1002 rather than attempting partial delivery.
    fn decode(&mut self, header: &mut FrameHeader, payload: &mut Vec<u8>) -> Result<()>;
}

/// The ordered chain of negotiated stages for one channel.
pub struct ExtensionPipeline {
    stages: Vec<Box<dyn ExtensionStage>>,
    claimed_rsv: u8,
}

impl ExtensionPipeline {
    /// A pipeline with no stages.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            stages: Vec::new(),
            claimed_rsv: 0,
        }
    }

    /// Build a pipeline, checking that no two stages claim the same RSV bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] on an RSV bit conflict.
    pub fn new(stages: Vec<Box<dyn ExtensionStage>>) -> Result<Self> {
        let mut claimed = 0u8;
        for stage in &stages {
            let bits = stage.rsv_bits();
            if claimed & bits != 0 {
                return Err(Error::InvalidExtension(format!(
                    "Extension '{}' claims already-taken RSV bits",
                    stage.name()
                )));
            }
            claimed |= bits;
        }
        Ok(Self {
            stages,
            claimed_rsv: claimed,
        })
    }

    /// Number of negotiated stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stage was negotiated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The RSV bits owned by the negotiated stages. Inbound frames carrying
    /// any other bit are a protocol violation.
    #[must_use]
    pub fn claimed_rsv(&self) -> u8 {
        self.claimed_rsv
    }

    /// Run the outbound transforms in negotiation order.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub fn encode(&mut self, header: &mut FrameHeader, payload: &mut Vec<u8>) -> Result<()> {
        for stage in &mut self.stages {
            stage.encode(header, payload)?;
        }
        Ok(())
    }

    /// Run the inbound transforms in reverse negotiation order.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub fn decode(&mut self, header: &mut FrameHeader, payload: &mut Vec<u8>) -> Result<()> {
        for stage in self.stages.iter_mut().rev() {
            stage.decode(header, payload)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExtensionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPipeline")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("claimed_rsv", &format_args!("{:#05b}", self.claimed_rsv))
            .finish()
    }
}
