use std::net::Ipv4Addr;

use domain::common::error::DomainError;

/// Editor for the peer blocks of the tunnel daemon's configuration file.
///
/// Every call is one complete read-modify-write; readers of the file never
/// observe a partially written version.
pub trait PeerConfigPort: Send + Sync {
    /// Append a block for the peer, creating the file with a minimal
    /// interface header if it does not exist. Not idempotent.
    fn append_peer(&self, name: &str, public_key: &str, address: Ipv4Addr)
    -> Result<(), DomainError>;

    /// Remove the block holding `public_key`. Returns `false` if the file
    /// does not exist, `true` otherwise, whether or not a block matched.
    fn remove_peer(&self, public_key: &str) -> Result<bool, DomainError>;

    /// Public keys of all peer blocks currently in the file. Empty when the
    /// file is absent.
    fn peer_keys(&self) -> Result<Vec<String>, DomainError>;
}
