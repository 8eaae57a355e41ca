use std::path::PathBuf;
use std::time::Duration;

use domain::forward::entity::PortBounds;
use domain::tunnel::allocator::AddressPool;
use domain::tunnel::peer_block::InterfaceHeader;

use super::common::ConfigError;
use super::firewall::BackendKind;
use super::GatewayConfig;

/// Fully resolved gateway settings.
///
/// Built once from a validated [`GatewayConfig`]; platform defaults and
/// fallbacks are already applied, so components never consult the
/// environment themselves.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub registry_path: PathBuf,

    pub pool: AddressPool,
    pub tunnel_interface: String,
    pub listen_port: u16,
    pub tunnel_config_file: PathBuf,
    pub server_public_key_path: PathBuf,
    pub endpoint: String,
    pub client_dns: Vec<String>,

    /// Resolved, never `Auto`.
    pub backend: BackendKind,
    pub public_interface: Option<String>,
    pub anchor_file: PathBuf,
    pub anchor_name: String,
    pub pf_conf: PathBuf,
    pub persist_path: PathBuf,
    pub port_bounds: PortBounds,

    pub use_sudo: bool,
    pub command_timeout: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let tunnel = &config.tunnel;
        let firewall = &config.firewall;
        Ok(Self {
            registry_path: config.agent.registry_path.clone(),
            pool: tunnel.address_pool()?,
            tunnel_interface: tunnel.interface.clone(),
            listen_port: tunnel.listen_port,
            tunnel_config_file: tunnel.config_file(),
            server_public_key_path: tunnel.server_public_key_path(),
            endpoint: tunnel.endpoint(),
            client_dns: tunnel.client_dns.clone(),
            backend: firewall.backend.resolve(),
            public_interface: firewall.public_interface.clone(),
            anchor_file: firewall.anchor_file.clone(),
            anchor_name: firewall.anchor_name.clone(),
            pf_conf: firewall.pf_conf.clone(),
            persist_path: firewall.persist_path.clone(),
            port_bounds: firewall.port_bounds(),
            use_sudo: config.system.use_sudo,
            command_timeout: config.system.command_timeout(),
        })
    }

    /// Header written when the tunnel configuration file is first created.
    pub fn interface_header(&self) -> InterfaceHeader {
        InterfaceHeader {
            address: self.pool.server_address(),
            prefix_len: self.pool.prefix_len(),
            listen_port: self.listen_port,
        }
    }
}
