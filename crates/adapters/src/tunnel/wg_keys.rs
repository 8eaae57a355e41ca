use std::path::Path;
use std::sync::Arc;

use domain::common::error::DomainError;
use domain::peer::entity::KeyPair;
use ports::secondary::command_runner::{CommandRunner, CommandSpec};
use ports::secondary::firewall_backend::PortFuture;
use ports::secondary::key_source::KeyPairSource;

/// Key pairs from `wg genkey` / `wg pubkey`.
pub struct WgKeyGenerator {
    runner: Arc<dyn CommandRunner>,
}

impl WgKeyGenerator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn wg(&self, spec: CommandSpec) -> Result<String, DomainError> {
        let out = self.runner.run(&spec).await?;
        let value = out.stdout.trim();
        if !out.success() || value.is_empty() {
            return Err(DomainError::Backend(format!(
                "`{}` failed: {}",
                spec.display(),
                out.stderr.trim()
            )));
        }
        Ok(value.to_string())
    }
}

impl KeyPairSource for WgKeyGenerator {
    fn generate(&self) -> PortFuture<'_, KeyPair> {
        Box::pin(async move {
            let private_key = self.wg(CommandSpec::new("wg").arg("genkey")).await?;
            let public_key = self
                .wg(CommandSpec::new("wg").arg("pubkey").stdin(format!("{private_key}\n")))
                .await?;
            Ok(KeyPair {
                private_key,
                public_key,
            })
        })
    }
}

/// Read the gateway's own public key, as handed to clients.
pub fn read_server_public_key(path: &Path) -> Result<String, DomainError> {
    let key = std::fs::read_to_string(path).map_err(|e| {
        DomainError::Backend(format!(
            "server public key {} unreadable: {e}",
            path.display()
        ))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(DomainError::Backend(format!(
            "server public key {} is empty",
            path.display()
        )));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ports::secondary::command_runner::CommandOutput;
    use ports::test_utils::ScriptedRunner;

    #[tokio::test]
    async fn generates_pair_through_wg() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("wg genkey", CommandOutput::ok("cHJpdmF0ZQ==\n"));
        runner.respond("wg pubkey", CommandOutput::ok("cHVibGlj\n"));

        let pair = WgKeyGenerator::new(runner.clone()).generate().await.unwrap();
        assert_eq!(pair.private_key, "cHJpdmF0ZQ==");
        assert_eq!(pair.public_key, "cHVibGlj");
        assert_eq!(runner.calls()[1].stdin.as_deref(), Some("cHJpdmF0ZQ==\n"));
    }

    #[tokio::test]
    async fn missing_wg_is_backend_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("wg genkey", CommandOutput::failed(127, "wg: not found"));
        assert!(matches!(
            WgKeyGenerator::new(runner).generate().await,
            Err(DomainError::Backend(_))
        ));
    }

    #[test]
    fn reads_trimmed_server_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_public.key");
        std::fs::write(&path, "c2VydmVy\n").unwrap();
        assert_eq!(read_server_public_key(&path).unwrap(), "c2VydmVy");
        assert!(read_server_public_key(&dir.path().join("absent")).is_err());
    }
}
