//! Connection role.

/// Which side of the upgrade this channel is.
///
/// The role decides masking direction in the Hybi-07+ drafts: clients mask
/// every outbound frame, servers never do, and each side rejects inbound
/// frames that break the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The side that sent the upgrade request.
    Client,
    /// The side that accepted the upgrade request.
    Server,
}

impl Role {
    /// Whether inbound frames must carry a mask key (Hybi-07+ only).
    #[inline]
    #[must_use]
    pub const fn expects_masked_peer(self) -> bool {
        matches!(self, Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::Server => write!(f, "Server"),
        }
    }
}
