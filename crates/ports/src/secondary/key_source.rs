use domain::peer::entity::KeyPair;

use super::firewall_backend::PortFuture;

/// Supplier of fresh tunnel credentials. The pair is opaque to the core.
pub trait KeyPairSource: Send + Sync {
    fn generate(&self) -> PortFuture<'_, KeyPair>;
}
