use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use domain::common::error::DomainError;
use ports::secondary::command_runner::{CommandOutput, CommandRunner, CommandSpec};
use ports::secondary::firewall_backend::PortFuture;
use ports::secondary::tunnel_daemon_port::{InterfaceStatus, ReloadOutcome, TunnelDaemonPort};

#[derive(Debug, Clone)]
pub struct WgSettings {
    pub interface: String,
    pub config_file: PathBuf,
}

/// Controls a running WireGuard interface through `wg` and `wg-quick`.
pub struct WgDaemon {
    settings: WgSettings,
    runner: Arc<dyn CommandRunner>,
}

impl WgDaemon {
    pub fn new(settings: WgSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    /// The configured interface if it is up, otherwise the first one listed
    /// (macOS names the interface `utunN` regardless of configuration).
    fn pick_interface(&self, listed: &str) -> Option<String> {
        let names: Vec<&str> = listed.split_whitespace().collect();
        if names.contains(&self.settings.interface.as_str()) {
            return Some(self.settings.interface.clone());
        }
        names.first().map(|s| (*s).to_string())
    }

    async fn wg(&self, args: &[&str]) -> Result<CommandOutput, DomainError> {
        let spec = CommandSpec::new("wg").args(args.iter().copied()).privileged();
        self.runner.run(&spec).await
    }

    async fn sync(&self, interface: &str) -> Result<(), DomainError> {
        let config = self.settings.config_file.to_string_lossy();
        let strip = self
            .runner
            .run(
                &CommandSpec::new("wg-quick")
                    .args(["strip", config.as_ref()])
                    .privileged(),
            )
            .await?;
        if !strip.success() || strip.stdout.trim().is_empty() {
            return Err(DomainError::Backend(format!(
                "wg-quick strip {config} failed: {}",
                strip.stderr.trim()
            )));
        }

        let mut staged = tempfile::Builder::new()
            .suffix(".conf")
            .tempfile()
            .map_err(|e| DomainError::Backend(format!("staging stripped config: {e}")))?;
        staged
            .write_all(strip.stdout.as_bytes())
            .map_err(|e| DomainError::Backend(format!("staging stripped config: {e}")))?;

        let staged_path = staged.path().to_string_lossy().into_owned();
        let out = self.wg(&["syncconf", interface, &staged_path]).await?;
        if !out.success() {
            return Err(DomainError::Backend(format!(
                "wg syncconf {interface} failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }
}

impl TunnelDaemonPort for WgDaemon {
    /// Without privilege or a running interface the file is left for the
    /// next daemon start and the reload reports degraded mode.
    fn reload(&self) -> PortFuture<'_, ReloadOutcome> {
        Box::pin(async move {
            let listed = match self.wg(&["show", "interfaces"]).await {
                Ok(out) if out.success() => out.stdout,
                Ok(out) => {
                    return Ok(ReloadOutcome::Degraded {
                        reason: format!("wg show interfaces: {}", out.stderr.trim()),
                    });
                }
                Err(e) if e.is_retriable() => return Err(e),
                Err(e) => {
                    return Ok(ReloadOutcome::Degraded {
                        reason: e.to_string(),
                    });
                }
            };

            let Some(interface) = self.pick_interface(&listed) else {
                return Ok(ReloadOutcome::Degraded {
                    reason: "no tunnel interface is up".to_string(),
                });
            };

            self.sync(&interface).await?;
            tracing::info!(interface = %interface, "tunnel configuration synced");
            Ok(ReloadOutcome::Synced { interface })
        })
    }

    fn dump(&self) -> PortFuture<'_, String> {
        Box::pin(async move {
            let out = self.wg(&["show", &self.settings.interface, "dump"]).await?;
            if out.success() {
                Ok(out.stdout)
            } else {
                Err(DomainError::Backend(format!(
                    "wg show {} dump: {}",
                    self.settings.interface,
                    out.stderr.trim()
                )))
            }
        })
    }

    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            matches!(
                self.runner.run(&CommandSpec::new("which").arg("wg")).await,
                Ok(out) if out.success()
            )
        })
    }

    fn interface_status(&self) -> PortFuture<'_, InterfaceStatus> {
        Box::pin(async move {
            let out = self.wg(&["show", &self.settings.interface]).await?;
            let running = out.success();
            Ok(InterfaceStatus {
                interface: self.settings.interface.clone(),
                running,
                detail: if running { out.stdout } else { out.stderr },
            })
        })
    }
}
