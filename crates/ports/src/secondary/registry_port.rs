use std::net::Ipv4Addr;

use domain::common::entity::{ForwardId, PeerId, Protocol};
use domain::common::error::DomainError;
use domain::forward::entity::{ForwardRule, NewForward};
use domain::peer::entity::{NewPeer, Peer};

/// Persistent registry of desired peers and forwards.
///
/// Implementations enforce uniqueness of peer name, tunnel address and
/// public key on insert, and delete a peer's forwards together with the peer.
/// Callers serialize mutations; the registry itself only guarantees that each
/// call is atomic.
pub trait RegistryPort: Send + Sync {
    fn list_peers(&self) -> Result<Vec<Peer>, DomainError>;

    fn get_peer(&self, id: PeerId) -> Result<Option<Peer>, DomainError>;

    fn find_peer_by_name(&self, name: &str) -> Result<Option<Peer>, DomainError>;

    /// Every tunnel address currently bound to a peer.
    fn list_tunnel_addresses(&self) -> Result<Vec<Ipv4Addr>, DomainError> {
        Ok(self
            .list_peers()?
            .into_iter()
            .map(|p| p.tunnel_address)
            .collect())
    }

    fn insert_peer(&self, peer: NewPeer) -> Result<PeerId, DomainError>;

    /// Delete a peer and cascade to its forwards. Returns `false` if absent.
    fn delete_peer(&self, id: PeerId) -> Result<bool, DomainError>;

    fn list_forwards(&self) -> Result<Vec<ForwardRule>, DomainError>;

    fn list_forwards_for_peer(&self, peer_id: PeerId) -> Result<Vec<ForwardRule>, DomainError> {
        Ok(self
            .list_forwards()?
            .into_iter()
            .filter(|f| f.peer_id == peer_id)
            .collect())
    }

    fn get_forward(&self, id: ForwardId) -> Result<Option<ForwardRule>, DomainError>;

    fn insert_forward(&self, forward: NewForward) -> Result<ForwardId, DomainError>;

    /// Returns `false` if absent.
    fn delete_forward(&self, id: ForwardId) -> Result<bool, DomainError>;

    fn set_forward_enabled(&self, id: ForwardId, enabled: bool) -> Result<(), DomainError>;

    /// Whether no enabled forward other than `exclude` holds
    /// `(public_port, protocol)`.
    fn is_port_available(
        &self,
        public_port: u16,
        protocol: Protocol,
        exclude: Option<ForwardId>,
    ) -> Result<bool, DomainError> {
        Ok(!self.list_forwards()?.iter().any(|f| {
            f.enabled
                && f.public_port == public_port
                && f.protocol == protocol
                && Some(f.id) != exclude
        }))
    }
}
