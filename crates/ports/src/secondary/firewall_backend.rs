use std::future::Future;
use std::pin::Pin;

use domain::common::error::DomainError;
use domain::forward::entity::PortMapping;

/// Boxed future returned by the async secondary ports.
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DomainError>> + Send + 'a>>;

/// NAT rule backend for one packet-filter family.
///
/// Only ever sees single-protocol mappings; "both" is expanded upstream.
/// `apply` and `retract` stage changes, `reload` makes them live (and
/// durable where the backend needs an explicit save).
///
/// Uses `Pin<Box<dyn Future>>` return types so the trait is dyn-compatible
/// and can be selected once at startup as `Arc<dyn FirewallBackend>`.
pub trait FirewallBackend: Send + Sync {
    /// Short backend name for logs and reports (`pf`, `netfilter`).
    fn name(&self) -> &'static str;

    /// Install the rules for `mapping`. Applying an already-present mapping
    /// leaves exactly one copy in place.
    fn apply<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()>;

    /// Remove the rules for `mapping`. Removing an absent mapping succeeds.
    fn retract<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()>;

    /// Mappings currently known to the live rule set.
    fn list(&self) -> PortFuture<'_, Vec<PortMapping>>;

    /// Whether the backend's prerequisite is met. Advisory only.
    fn is_configured(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    fn reload(&self) -> PortFuture<'_, ()>;
}
