use std::sync::Arc;

use adapters::firewall::interface::{detect_bsd, detect_linux};
use adapters::firewall::netfilter::{NetfilterBackend, NetfilterSettings};
use adapters::firewall::pf_anchor::{PfAnchorBackend, PfSettings};
use adapters::storage::redb_registry::RedbRegistry;
use adapters::system::command_runner::TokioCommandRunner;
use adapters::tunnel::wg_config_file::WgConfigFile;
use adapters::tunnel::wg_daemon::{WgDaemon, WgSettings};
use adapters::tunnel::wg_keys::WgKeyGenerator;
use anyhow::Context;
use application::reconciliation_service_impl::{GatewayPorts, ReconciliationService};
use application::retry::RetryConfig;
use application::status_probe::StatusProbe;
use application::system_report::SystemInspector;
use infrastructure::config::{BackendKind, GatewaySettings};
use ports::secondary::command_runner::CommandRunner;
use ports::secondary::firewall_backend::FirewallBackend;
use ports::secondary::peer_config_port::PeerConfigPort;
use ports::secondary::registry_port::RegistryPort;
use ports::secondary::tunnel_daemon_port::TunnelDaemonPort;
use tracing::debug;

/// Most commands a single backend call issues (netfilter: check and
/// append for each of three rules).
const COMMANDS_PER_BACKEND_CALL: u32 = 6;

/// Everything a CLI command needs, wired from settings.
pub struct Gateway {
    pub settings: GatewaySettings,
    pub service: ReconciliationService,
    pub probe: StatusProbe,
    pub inspector: SystemInspector,
    pub firewall: Arc<dyn FirewallBackend>,
}

/// Build the adapters and services for one CLI invocation.
pub async fn build(settings: GatewaySettings) -> anyhow::Result<Gateway> {
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new(
        settings.use_sudo,
        settings.command_timeout,
    ));

    // ── Registry ────────────────────────────────────────────────────
    if let Some(parent) = settings.registry_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating registry directory {}", parent.display()))?;
    }
    let registry: Arc<dyn RegistryPort> = Arc::new(
        RedbRegistry::open(&settings.registry_path)
            .with_context(|| format!("opening registry {}", settings.registry_path.display()))?,
    );

    // ── Firewall ────────────────────────────────────────────────────
    let firewall = firewall_backend(&settings, &runner).await;

    // ── Tunnel ──────────────────────────────────────────────────────
    let peer_config: Arc<dyn PeerConfigPort> = Arc::new(WgConfigFile::new(
        settings.tunnel_config_file.clone(),
        settings.interface_header(),
    ));
    let daemon: Arc<dyn TunnelDaemonPort> = Arc::new(WgDaemon::new(
        WgSettings {
            interface: settings.tunnel_interface.clone(),
            config_file: settings.tunnel_config_file.clone(),
        },
        Arc::clone(&runner),
    ));
    let keys = Arc::new(WgKeyGenerator::new(Arc::clone(&runner)));

    let retry = RetryConfig {
        timeout: settings.command_timeout * COMMANDS_PER_BACKEND_CALL,
        ..RetryConfig::default()
    };
    let service = ReconciliationService::new(
        GatewayPorts {
            registry: Arc::clone(&registry),
            peer_config: Arc::clone(&peer_config),
            firewall: Arc::clone(&firewall),
            daemon: Arc::clone(&daemon),
            keys,
        },
        settings.pool,
        settings.port_bounds,
    )
    .with_retry(retry);

    let probe = StatusProbe::new(Arc::clone(&daemon), settings.command_timeout);
    let inspector = SystemInspector {
        registry,
        peer_config,
        firewall: Arc::clone(&firewall),
        daemon,
        runner,
        pool: settings.pool,
    };

    Ok(Gateway {
        settings,
        service,
        probe,
        inspector,
        firewall,
    })
}

async fn firewall_backend(
    settings: &GatewaySettings,
    runner: &Arc<dyn CommandRunner>,
) -> Arc<dyn FirewallBackend> {
    if settings.backend.resolve() == BackendKind::Netfilter {
        let public_interface = match &settings.public_interface {
            Some(iface) => iface.clone(),
            None => detect_linux(runner.as_ref()).await,
        };
        debug!(backend = "netfilter", public_interface = %public_interface, "firewall backend selected");
        Arc::new(NetfilterBackend::new(
            NetfilterSettings {
                public_interface,
                tunnel_interface: settings.tunnel_interface.clone(),
                persist_path: settings.persist_path.clone(),
            },
            Arc::clone(runner),
        ))
    } else {
        let public_interface = match &settings.public_interface {
            Some(iface) => iface.clone(),
            None => detect_bsd(runner.as_ref()).await,
        };
        debug!(backend = "pf", public_interface = %public_interface, "firewall backend selected");
        Arc::new(PfAnchorBackend::new(
            PfSettings {
                anchor_file: settings.anchor_file.clone(),
                anchor_name: settings.anchor_name.clone(),
                pf_conf: settings.pf_conf.clone(),
                public_interface,
            },
            Arc::clone(runner),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure::config::GatewayConfig;

    fn settings_in(dir: &tempfile::TempDir, backend: &str) -> GatewaySettings {
        let yaml = format!(
            r#"
agent:
  registry_path: {root}/state/registry.redb
tunnel:
  config_dir: {root}
firewall:
  backend: {backend}
  public_interface: eth9
  anchor_file: {root}/anchor
system:
  use_sudo: false
"#,
            root = dir.path().display()
        );
        GatewayConfig::from_yaml(&yaml).unwrap().settings().unwrap()
    }

    #[tokio::test]
    async fn builds_netfilter_gateway_and_creates_registry_dir() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = build(settings_in(&dir, "netfilter")).await.unwrap();

        assert_eq!(gateway.firewall.name(), "netfilter");
        assert!(dir.path().join("state/registry.redb").exists());
        assert!(gateway.service.list_peers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn builds_pf_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = build(settings_in(&dir, "pf")).await.unwrap();

        assert_eq!(gateway.firewall.name(), "pf");
        assert!(gateway.firewall.list().await.unwrap().is_empty());
        assert_eq!(gateway.service.subnet_summary().unwrap().total_hosts, 254);
    }
}
