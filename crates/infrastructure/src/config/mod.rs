//! Gateway configuration: structs, parsing, and validation.
//!
//! The config module is split across several sub-modules:
//! - `common`: shared helpers and `ConfigError`
//! - `tunnel`, `firewall`, `system`: one per YAML section
//! - `settings`: the validated, resolved value handed to components

mod common;
mod firewall;
mod settings;
mod system;
mod tunnel;

pub use common::ConfigError;
pub use firewall::{BackendKind, FirewallConfig};
pub use settings::GatewaySettings;
pub use system::SystemConfig;
pub use tunnel::TunnelConfig;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_REGISTRY_PATH;
use common::{require_non_empty, warn_if_world_writable};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub tunnel: TunnelConfig,

    #[serde(default)]
    pub firewall: FirewallConfig,

    #[serde(default)]
    pub system: SystemConfig,
}

impl GatewayConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_writable(path, "config file");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping.
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty(
            "agent.registry_path",
            &self.agent.registry_path.to_string_lossy(),
        )?;
        self.tunnel.validate()?;
        self.firewall.validate()?;
        self.system.validate()?;
        Ok(())
    }

    /// Resolve the validated config into the settings every component is
    /// constructed from.
    pub fn settings(&self) -> Result<GatewaySettings, ConfigError> {
        GatewaySettings::from_config(self)
    }
}

// ── Agent section ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            registry_path: default_registry_path(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}
fn default_log_format() -> LogFormat {
    LogFormat::Text
}
fn default_registry_path() -> PathBuf {
    PathBuf::from(DEFAULT_REGISTRY_PATH)
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn empty_document_yields_defaults() {
        let config = GatewayConfig::from_yaml("").unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Warn);
        assert_eq!(config.tunnel.subnet, "10.0.0.0/24");
        assert_eq!(config.tunnel.server_address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.tunnel.listen_port, 51820);
        assert_eq!(config.firewall.backend, BackendKind::Auto);
        assert!(config.system.use_sudo);
        assert_eq!(config.system.command_timeout_secs, 10);
    }

    #[test]
    fn load_full_config() {
        let yaml = r#"
agent:
  log_level: debug
  log_format: json
  registry_path: /tmp/registry.redb

tunnel:
  subnet: 10.8.0.0/16
  server_address: 10.8.0.1
  listen_port: 51821
  interface: wg1
  config_dir: /tmp/wireguard
  endpoint: vpn.example.com:51821
  client_dns: [1.1.1.1, 9.9.9.9]

firewall:
  backend: netfilter
  public_interface: ens3
  persist_path: /tmp/rules.v4
  min_public_port: 2000
  max_public_port: 3000

system:
  use_sudo: false
  command_timeout_secs: 5
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Debug);
        assert_eq!(config.agent.log_format, LogFormat::Json);
        assert_eq!(config.tunnel.interface, "wg1");
        assert_eq!(config.tunnel.client_dns.len(), 2);
        assert_eq!(config.firewall.backend, BackendKind::Netfilter);
        assert_eq!(config.firewall.public_interface.as_deref(), Some("ens3"));
        assert!(!config.system.use_sudo);

        let settings = config.settings().unwrap();
        assert_eq!(settings.pool.host_count(), 65534);
        assert_eq!(
            settings.tunnel_config_file,
            PathBuf::from("/tmp/wireguard/wg1.conf")
        );
        assert_eq!(settings.endpoint, "vpn.example.com:51821");
        assert_eq!(settings.port_bounds.min_public, 2000);
        assert_eq!(settings.command_timeout.as_secs(), 5);
    }

    #[test]
    fn unknown_field_rejected() {
        let yaml = r#"
tunnel:
  subnett: 10.0.0.0/24
"#;
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn invalid_backend_rejected() {
        let yaml = r#"
firewall:
  backend: ipfw
"#;
        assert!(GatewayConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn server_outside_subnet_rejected() {
        let yaml = r#"
tunnel:
  subnet: 10.0.0.0/24
  server_address: 192.168.1.1
"#;
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let yaml = r#"
system:
  command_timeout_secs: 0
"#;
        assert!(GatewayConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn load_reads_file_and_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "tunnel:\n  interface: wg7\n").unwrap();
        assert_eq!(GatewayConfig::load(&path).unwrap().tunnel.interface, "wg7");

        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            GatewayConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
        assert_eq!(
            GatewayConfig::load_or_default(&missing)
                .unwrap()
                .tunnel
                .interface,
            "wg0"
        );
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
