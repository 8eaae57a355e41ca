//! BSD packet-filter backend: forwards live as directives in a dedicated
//! anchor file, loaded by `pfctl`.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use domain::common::error::DomainError;
use domain::forward::directive::AnchorRules;
use domain::forward::entity::PortMapping;
use ports::secondary::command_runner::{CommandRunner, CommandSpec};
use ports::secondary::firewall_backend::{FirewallBackend, PortFuture};
use tokio::sync::Mutex;

use crate::fs_util::{atomic_write, read_optional};

#[derive(Debug, Clone)]
pub struct PfSettings {
    pub anchor_file: PathBuf,
    pub anchor_name: String,
    pub pf_conf: PathBuf,
    pub public_interface: String,
}

pub struct PfAnchorBackend {
    settings: PfSettings,
    runner: Arc<dyn CommandRunner>,
    /// Serializes read-modify-write cycles on the anchor file.
    file_lock: Mutex<()>,
}

impl PfAnchorBackend {
    pub fn new(settings: PfSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            settings,
            runner,
            file_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<AnchorRules, DomainError> {
        let path = &self.settings.anchor_file;
        let content = read_optional(path).map_err(|e| {
            DomainError::Backend(format!("reading anchor {}: {e}", path.display()))
        })?;
        Ok(AnchorRules::parse(content.as_deref().unwrap_or_default()))
    }

    /// Write the anchor in place; on permission denial, stage it next to the
    /// anchor and rename it over the target with privileged commands.
    async fn store(&self, rules: &AnchorRules) -> Result<(), DomainError> {
        let path = &self.settings.anchor_file;
        let content = rules.render();
        match atomic_write(path, &content) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                tracing::debug!(anchor = %path.display(), "anchor not writable, using privileged move");
                self.store_privileged(&content).await
            }
            Err(e) => Err(DomainError::Backend(format!(
                "writing anchor {}: {e}",
                path.display()
            ))),
        }
    }

    /// The staged copy lives in the anchor's own directory so the final
    /// `mv` is a same-filesystem rename.
    async fn store_privileged(&self, content: &str) -> Result<(), DomainError> {
        let path = &self.settings.anchor_file;
        let mut staged = path.clone().into_os_string();
        staged.push(".staged");
        let staged = PathBuf::from(staged);

        let tee = CommandSpec::new("tee")
            .arg(staged.to_string_lossy())
            .stdin(content)
            .privileged();
        self.run_checked(&tee).await?;

        let mv = CommandSpec::new("mv")
            .arg("-f")
            .arg(staged.to_string_lossy())
            .arg(path.to_string_lossy())
            .privileged();
        self.run_checked(&mv).await
    }

    async fn run_checked(&self, spec: &CommandSpec) -> Result<(), DomainError> {
        let out = self.runner.run(spec).await?;
        if out.success() {
            Ok(())
        } else {
            Err(DomainError::Backend(format!(
                "`{}` failed: {}",
                spec.display(),
                out.stderr.trim()
            )))
        }
    }
}

impl FirewallBackend for PfAnchorBackend {
    fn name(&self) -> &'static str {
        "pf"
    }

    fn apply<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.file_lock.lock().await;
            let mut rules = self.load()?;
            if rules.apply(&self.settings.public_interface, mapping) {
                self.store(&rules).await?;
                tracing::debug!(mapping = %mapping, anchor = %self.settings.anchor_file.display(), "pf directives added");
            }
            Ok(())
        })
    }

    fn retract<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.file_lock.lock().await;
            let mut rules = self.load()?;
            if rules.retract(mapping) {
                self.store(&rules).await?;
                tracing::debug!(mapping = %mapping, "pf directives removed");
            }
            Ok(())
        })
    }

    fn list(&self) -> PortFuture<'_, Vec<PortMapping>> {
        Box::pin(async move { Ok(self.load()?.mappings()) })
    }

    fn is_configured(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { self.settings.anchor_file.exists() })
    }

    /// Reload `pf.conf` (which loads the anchor) and enable pf. An already
    /// enabled pf is fine; a refused escalation leaves the staged file for
    /// the next reload.
    fn reload(&self) -> PortFuture<'_, ()> {
        Box::pin(async move {
            let marker = format!("anchor \"{}\"", self.settings.anchor_name);
            let rules = self
                .runner
                .run(&CommandSpec::new("pfctl").arg("-sr").privileged())
                .await?;
            if rules.success() && !rules.stdout.contains(&marker) {
                tracing::warn!(
                    anchor = %self.settings.anchor_name,
                    pf_conf = %self.settings.pf_conf.display(),
                    "anchor is not referenced by the main ruleset"
                );
            }

            let load = CommandSpec::new("pfctl")
                .arg("-f")
                .arg(self.settings.pf_conf.to_string_lossy())
                .privileged();
            let out = self.runner.run(&load).await?;
            if out.needs_authorization() {
                return Ok(());
            }
            if !out.success() {
                tracing::error!(command = %load.display(), stderr = %out.stderr.trim(), "pf reload failed");
                return Err(DomainError::Backend(format!(
                    "`{}` failed: {}",
                    load.display(),
                    out.stderr.trim()
                )));
            }

            let enable = self
                .runner
                .run(&CommandSpec::new("pfctl").arg("-e").privileged())
                .await?;
            if !enable.success() && !enable.stderr.contains("already enabled") {
                tracing::warn!(stderr = %enable.stderr.trim(), "pfctl -e failed");
            }
            Ok(())
        })
    }
}
