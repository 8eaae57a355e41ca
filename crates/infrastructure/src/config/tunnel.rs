use std::net::Ipv4Addr;
use std::path::PathBuf;

use domain::tunnel::allocator::AddressPool;
use domain::tunnel::error::AllocatorError;
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, invalid, require_non_empty};
use crate::constants::{
    DEFAULT_LISTEN_PORT, DEFAULT_SERVER_ADDRESS, DEFAULT_SUBNET, DEFAULT_TUNNEL_INTERFACE,
    SERVER_PUBLIC_KEY_FILE, default_wireguard_dir,
};

/// Tunnel daemon and address pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    #[serde(default = "default_subnet")]
    pub subnet: String,

    #[serde(default = "default_server_address")]
    pub server_address: Ipv4Addr,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_interface")]
    pub interface: String,

    /// Directory holding `<interface>.conf`. Platform default when unset.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,

    /// Defaults to `<config_dir>/server_public.key`.
    #[serde(default)]
    pub server_public_key_path: Option<PathBuf>,

    /// `host:port` advertised to clients.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub client_dns: Vec<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            subnet: default_subnet(),
            server_address: default_server_address(),
            listen_port: default_listen_port(),
            interface: default_interface(),
            config_dir: None,
            server_public_key_path: None,
            endpoint: None,
            client_dns: Vec::new(),
        }
    }
}

impl TunnelConfig {
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_wireguard_dir()))
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(format!("{}.conf", self.interface))
    }

    pub fn server_public_key_path(&self) -> PathBuf {
        self.server_public_key_path
            .clone()
            .unwrap_or_else(|| self.config_dir().join(SERVER_PUBLIC_KEY_FILE))
    }

    /// Configured endpoint, or the loopback fallback on the listen port.
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", self.listen_port))
    }

    pub fn address_pool(&self) -> Result<AddressPool, ConfigError> {
        AddressPool::parse(&self.subnet, self.server_address).map_err(|e| match e {
            AllocatorError::InvalidSubnet(reason) => ConfigError::InvalidCidr {
                value: self.subnet.clone(),
                reason,
            },
            other => invalid("tunnel.server_address", other.to_string()),
        })
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.address_pool()?;
        require_non_empty("tunnel.interface", &self.interface)?;
        if self.interface.contains('/') {
            return Err(invalid("tunnel.interface", "must not contain '/'"));
        }
        if self.listen_port == 0 {
            return Err(invalid("tunnel.listen_port", "must be 1-65535"));
        }
        if let Some(endpoint) = &self.endpoint {
            let port_ok = endpoint
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p > 0));
            if !port_ok {
                return Err(invalid(
                    "tunnel.endpoint",
                    format!("'{endpoint}' is not host:port"),
                ));
            }
        }
        for dns in &self.client_dns {
            require_non_empty("tunnel.client_dns", dns)?;
        }
        Ok(())
    }
}

fn default_subnet() -> String {
    DEFAULT_SUBNET.to_string()
}
fn default_server_address() -> Ipv4Addr {
    Ipv4Addr::from(DEFAULT_SERVER_ADDRESS)
}
fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}
fn default_interface() -> String {
    DEFAULT_TUNNEL_INTERFACE.to_string()
}
