//! Draft version selection.
//!
//! The engine speaks four historical drafts behind one channel abstraction.
//! Hybi-08 and Hybi-13 are wire-identical to Hybi-07 apart from the version
//! tag, so the three share one header codec; Hybi-00 (the legacy
//! Hixie-era draft) has its own delimiter-based framing and challenge scheme.

use crate::channel::Role;
use crate::protocol::handshake::UpgradeRequest;

/// A negotiated protocol draft version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Hixie-76 / Hybi-00: delimited text frames, MD5 challenge.
    V00,
    /// Hybi-07: binary framing, SHA-1 accept key.
    V07,
    /// Hybi-08: identical to Hybi-07 on the wire.
    V08,
    /// Hybi-13 / RFC 6455: identical to Hybi-07 on the wire.
    V13,
}

/// Preference order for negotiation: newest first, so a request satisfying
/// several predicates resolves to the most capable draft.
const PREFERENCE: [ProtocolVersion; 4] = [
    ProtocolVersion::V13,
    ProtocolVersion::V08,
    ProtocolVersion::V07,
    ProtocolVersion::V00,
];

impl ProtocolVersion {
    /// The `Sec-WebSocket-Version` number this draft answers to.
    #[inline]
    #[must_use]
    pub const fn wire_version(self) -> u8 {
        match self {
            ProtocolVersion::V00 => 0,
            ProtocolVersion::V07 => 7,
            ProtocolVersion::V08 => 8,
            ProtocolVersion::V13 => 13,
        }
    }

    /// Whether this draft uses the legacy delimiter framing.
    #[inline]
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, ProtocolVersion::V00)
    }

    /// Whether outbound frames from `role` must carry a mask key.
    ///
    /// Masking exists only in the Hybi-07+ wire format and only for the
    /// client-to-server direction.
    #[inline]
    #[must_use]
    pub const fn masking_required(self, role: Role) -> bool {
        !self.is_legacy() && matches!(role, Role::Client)
    }

    /// Whether this draft can negotiate wire extensions.
    ///
    /// The legacy framing has no reserved bits for an extension to claim.
    #[inline]
    #[must_use]
    pub const fn supports_extensions(self) -> bool {
        !self.is_legacy()
    }

    /// Check whether an upgrade request speaks this draft.
    #[must_use]
    pub fn accepts(self, request: &UpgradeRequest) -> bool {
        match self {
            ProtocolVersion::V00 => {
                request.key.is_none() && request.key1.is_some() && request.key2.is_some()
            }
            modern => {
                request.key.is_some() && request.version == Some(modern.wire_version())
            }
        }
    }

    /// Pick the draft for a request, trying the newest version first.
    #[must_use]
    pub fn select(request: &UpgradeRequest) -> Option<ProtocolVersion> {
        PREFERENCE.into_iter().find(|v| v.accepts(request))
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::V00 => write!(f, "hybi-00"),
            ProtocolVersion::V07 => write!(f, "hybi-07"),
            ProtocolVersion::V08 => write!(f, "hybi-08"),
            ProtocolVersion::V13 => write!(f, "hybi-13"),
        }
    }
}
