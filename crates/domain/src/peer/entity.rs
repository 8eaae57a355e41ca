use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::common::entity::PeerId;

use super::error::PeerError;

/// Maximum length of an operator-chosen peer name.
pub const MAX_PEER_NAME_LEN: usize = 64;

/// Opaque tunnel credential pair supplied by a key source.
///
/// The core never inspects the key material; `Debug` masks the private half.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"***")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// A provisioned VPN peer as stored in the registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tunnel_address: Ipv4Addr,
    pub public_key: String,
    pub private_key: String,
    /// Creation time, seconds since the Unix epoch.
    #[serde(default)]
    pub created_at: u64,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("tunnel_address", &self.tunnel_address)
            .field("public_key", &self.public_key)
            .field("private_key", &"***")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Registry insert payload. The registry assigns the id.
#[derive(Debug, Clone)]
pub struct NewPeer {
    pub name: String,
    pub description: String,
    pub tunnel_address: Ipv4Addr,
    pub keys: KeyPair,
    pub created_at: u64,
}

impl NewPeer {
    pub fn into_peer(self, id: PeerId) -> Peer {
        Peer {
            id,
            name: self.name,
            description: self.description,
            tunnel_address: self.tunnel_address,
            public_key: self.keys.public_key,
            private_key: self.keys.private_key,
            created_at: self.created_at,
        }
    }
}

/// Validate an operator-chosen peer name.
///
/// The name is written verbatim into a `# Peer: <name>` comment line, so
/// control characters (newlines in particular) are rejected.
pub fn validate_peer_name(name: &str) -> Result<(), PeerError> {
    if name.trim().is_empty() {
        return Err(PeerError::InvalidName {
            reason: "name must not be empty".to_string(),
        });
    }
    if name != name.trim() {
        return Err(PeerError::InvalidName {
            reason: "name must not start or end with whitespace".to_string(),
        });
    }
    if name.chars().count() > MAX_PEER_NAME_LEN {
        return Err(PeerError::InvalidName {
            reason: format!("name must be at most {MAX_PEER_NAME_LEN} characters"),
        });
    }
    if name.chars().any(char::is_control) {
        return Err(PeerError::InvalidName {
            reason: "name must not contain control characters".to_string(),
        });
    }
    Ok(())
}
