use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use super::firewall_backend::PortFuture;

/// Outcome of asking the tunnel daemon to pick up configuration changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Live interface resynced from the configuration file.
    Synced { interface: String },
    /// The daemon could not be reached (not running, no privilege). The
    /// file is still authoritative and is picked up on the next start.
    Degraded { reason: String },
}

/// Snapshot of the tunnel interface for operator reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
    pub interface: String,
    pub running: bool,
    /// Raw `show` output, or the failure reason when not running.
    pub detail: String,
}

/// Control seam for the tunnel daemon.
pub trait TunnelDaemonPort: Send + Sync {
    /// Resync the live interface with the configuration file.
    fn reload(&self) -> PortFuture<'_, ReloadOutcome>;

    /// Raw per-peer runtime dump (`wg show <iface> dump`).
    fn dump(&self) -> PortFuture<'_, String>;

    /// Whether the daemon's control tool is installed.
    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    fn interface_status(&self) -> PortFuture<'_, InterfaceStatus>;
}
