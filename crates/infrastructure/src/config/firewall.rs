use std::path::PathBuf;

use domain::forward::entity::PortBounds;
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, invalid, require_non_empty};
use crate::constants::{
    DEFAULT_ANCHOR_FILE, DEFAULT_ANCHOR_NAME, DEFAULT_MAX_PUBLIC_PORT, DEFAULT_MIN_PUBLIC_PORT,
    DEFAULT_NETFILTER_PERSIST_PATH, DEFAULT_PF_CONF,
};

/// Which packet filter realises port forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// pf on BSD-family hosts, netfilter on Linux.
    #[default]
    Auto,
    Pf,
    Netfilter,
}

impl BackendKind {
    /// The concrete backend for this host. Never returns `Auto`.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(target_os = "linux") => Self::Netfilter,
            Self::Auto => Self::Pf,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pf => "pf",
            Self::Netfilter => "netfilter",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Host interface facing the outside. Auto-detected when unset.
    #[serde(default)]
    pub public_interface: Option<String>,

    #[serde(default = "default_anchor_file")]
    pub anchor_file: PathBuf,

    #[serde(default = "default_anchor_name")]
    pub anchor_name: String,

    #[serde(default = "default_pf_conf")]
    pub pf_conf: PathBuf,

    #[serde(default = "default_persist_path")]
    pub persist_path: PathBuf,

    #[serde(default = "default_min_public_port")]
    pub min_public_port: u16,

    #[serde(default = "default_max_public_port")]
    pub max_public_port: u16,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            public_interface: None,
            anchor_file: default_anchor_file(),
            anchor_name: default_anchor_name(),
            pf_conf: default_pf_conf(),
            persist_path: default_persist_path(),
            min_public_port: default_min_public_port(),
            max_public_port: default_max_public_port(),
        }
    }
}

impl FirewallConfig {
    pub fn port_bounds(&self) -> PortBounds {
        PortBounds {
            min_public: self.min_public_port,
            max_public: self.max_public_port,
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.min_public_port == 0 {
            return Err(invalid("firewall.min_public_port", "must be 1-65535"));
        }
        if self.min_public_port > self.max_public_port {
            return Err(invalid(
                "firewall.min_public_port",
                format!(
                    "{} exceeds firewall.max_public_port {}",
                    self.min_public_port, self.max_public_port
                ),
            ));
        }
        if let Some(iface) = &self.public_interface {
            require_non_empty("firewall.public_interface", iface)?;
        }
        if self.backend.resolve() == BackendKind::Pf {
            require_non_empty("firewall.anchor_name", &self.anchor_name)?;
        }
        Ok(())
    }
}

fn default_anchor_file() -> PathBuf {
    PathBuf::from(DEFAULT_ANCHOR_FILE)
}
fn default_anchor_name() -> String {
    DEFAULT_ANCHOR_NAME.to_string()
}
fn default_pf_conf() -> PathBuf {
    PathBuf::from(DEFAULT_PF_CONF)
}
fn default_persist_path() -> PathBuf {
    PathBuf::from(DEFAULT_NETFILTER_PERSIST_PATH)
}
fn default_min_public_port() -> u16 {
    DEFAULT_MIN_PUBLIC_PORT
}
fn default_max_public_port() -> u16 {
    DEFAULT_MAX_PUBLIC_PORT
}
