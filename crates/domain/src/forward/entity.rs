use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::common::entity::{ForwardId, PeerId, Protocol};

use super::error::ForwardError;

/// Backend-facing unit of a port forward: one protocol, one host port,
/// one peer address and port.
///
/// Firewall rules are keyed by address, never by peer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortMapping {
    pub protocol: Protocol,
    pub public_port: u16,
    pub peer_address: Ipv4Addr,
    pub target_port: u16,
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} -> {}:{}",
            self.public_port, self.protocol, self.peer_address, self.target_port
        )
    }
}

/// A stored forward rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRule {
    pub id: ForwardId,
    pub peer_id: PeerId,
    pub peer_address: Ipv4Addr,
    pub public_port: u16,
    pub target_port: u16,
    pub protocol: Protocol,
    pub enabled: bool,
    #[serde(default)]
    pub created_at: u64,
}

impl ForwardRule {
    pub fn mapping(&self) -> PortMapping {
        PortMapping {
            protocol: self.protocol,
            public_port: self.public_port,
            peer_address: self.peer_address,
            target_port: self.target_port,
        }
    }
}

/// Registry insert payload for a single-protocol forward.
#[derive(Debug, Clone)]
pub struct NewForward {
    pub peer_id: PeerId,
    pub mapping: PortMapping,
    pub enabled: bool,
    pub created_at: u64,
}

impl NewForward {
    pub fn into_rule(self, id: ForwardId) -> ForwardRule {
        ForwardRule {
            id,
            peer_id: self.peer_id,
            peer_address: self.mapping.peer_address,
            public_port: self.mapping.public_port,
            target_port: self.mapping.target_port,
            protocol: self.mapping.protocol,
            enabled: self.enabled,
            created_at: self.created_at,
        }
    }
}

/// Accepted range for host-facing ports. Target ports may use 1-65535.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBounds {
    pub min_public: u16,
    pub max_public: u16,
}

impl Default for PortBounds {
    fn default() -> Self {
        Self {
            min_public: 1,
            max_public: u16::MAX,
        }
    }
}

impl PortBounds {
    pub fn validate(&self, public_port: u16, target_port: u16) -> Result<(), ForwardError> {
        let min = self.min_public.max(1);
        if public_port < min || public_port > self.max_public {
            return Err(ForwardError::PublicPortOutOfRange {
                port: public_port,
                min,
                max: self.max_public,
            });
        }
        if target_port == 0 {
            return Err(ForwardError::TargetPortOutOfRange { port: target_port });
        }
        Ok(())
    }
}
