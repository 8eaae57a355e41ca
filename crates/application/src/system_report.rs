use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use domain::common::error::DomainError;
use domain::forward::entity::PortMapping;
use domain::tunnel::allocator::{AddressPool, SubnetSummary};
use ports::secondary::command_runner::CommandRunner;
use ports::secondary::firewall_backend::FirewallBackend;
use ports::secondary::peer_config_port::PeerConfigPort;
use ports::secondary::registry_port::RegistryPort;
use ports::secondary::tunnel_daemon_port::{InterfaceStatus, TunnelDaemonPort};
use serde::Serialize;

/// Operator-facing health snapshot of the gateway host.
#[derive(Debug, Clone, Serialize)]
pub struct SystemReport {
    pub daemon_installed: bool,
    pub interface: InterfaceStatus,
    pub firewall_backend: String,
    pub firewall_configured: bool,
    /// `false` means privileged commands will be refused and changes only
    /// reach files, not the running system.
    pub privileged: bool,
    pub subnet: SubnetSummary,
    pub peers: usize,
    pub forwards: usize,
    pub enabled_forwards: usize,
}

impl SystemReport {
    pub fn degraded(&self) -> bool {
        !self.privileged || !self.daemon_installed || !self.firewall_configured
    }
}

/// Differences between the registry and the two live stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Registered peers with no block in the configuration file (names).
    pub missing_blocks: Vec<String>,
    /// Peer blocks whose key no registered peer holds.
    pub unexpected_blocks: Vec<String>,
    /// Enabled forwards absent from the live rule set.
    pub missing_rules: Vec<PortMapping>,
    /// Live rules no enabled forward accounts for.
    pub unexpected_rules: Vec<PortMapping>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing_blocks.is_empty()
            && self.unexpected_blocks.is_empty()
            && self.missing_rules.is_empty()
            && self.unexpected_rules.is_empty()
    }
}

/// Builds reports by reading every store. Never mutates anything.
pub struct SystemInspector {
    pub registry: Arc<dyn RegistryPort>,
    pub peer_config: Arc<dyn PeerConfigPort>,
    pub firewall: Arc<dyn FirewallBackend>,
    pub daemon: Arc<dyn TunnelDaemonPort>,
    pub runner: Arc<dyn CommandRunner>,
    pub pool: AddressPool,
}

impl SystemInspector {
    pub async fn report(&self) -> Result<SystemReport, DomainError> {
        let peers = self.registry.list_peers()?;
        let forwards = self.registry.list_forwards()?;
        let assigned: Vec<_> = peers.iter().map(|p| p.tunnel_address).collect();

        let daemon_installed = self.daemon.is_installed().await;
        let interface = match self.daemon.interface_status().await {
            Ok(status) => status,
            Err(e) => InterfaceStatus {
                interface: String::new(),
                running: false,
                detail: e.to_string(),
            },
        };

        Ok(SystemReport {
            daemon_installed,
            interface,
            firewall_backend: self.firewall.name().to_string(),
            firewall_configured: self.firewall.is_configured().await,
            privileged: self.runner.can_escalate().await,
            subnet: self.pool.summary(&assigned),
            peers: peers.len(),
            enabled_forwards: forwards.iter().filter(|f| f.enabled).count(),
            forwards: forwards.len(),
        })
    }

    /// Compare the registry against the configuration file and the live
    /// rule set. Reports only; nothing is repaired.
    pub async fn drift(&self) -> Result<DriftReport, DomainError> {
        let peers = self.registry.list_peers()?;
        let file_keys: HashSet<String> = self.peer_config.peer_keys()?.into_iter().collect();
        let registered_keys: HashSet<&str> = peers.iter().map(|p| p.public_key.as_str()).collect();

        let missing_blocks = peers
            .iter()
            .filter(|p| !file_keys.contains(&p.public_key))
            .map(|p| p.name.clone())
            .collect();
        let mut unexpected_blocks: Vec<String> = file_keys
            .iter()
            .filter(|k| !registered_keys.contains(k.as_str()))
            .cloned()
            .collect();
        unexpected_blocks.sort();

        let desired: BTreeSet<PortMapping> = self
            .registry
            .list_forwards()?
            .iter()
            .filter(|f| f.enabled)
            .map(|f| f.mapping())
            .collect();
        let live: BTreeSet<PortMapping> = self.firewall.list().await?.into_iter().collect();

        Ok(DriftReport {
            missing_blocks,
            unexpected_blocks,
            missing_rules: desired.difference(&live).copied().collect(),
            unexpected_rules: live.difference(&desired).copied().collect(),
        })
    }
}
