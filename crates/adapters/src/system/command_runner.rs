//! External process execution with optional privilege escalation.
//!
//! Privileged commands go through `sudo -n`, which fails fast instead of
//! prompting when a password would be needed. That refusal is reported as
//! an ordinary failed [`CommandOutput`] so callers can degrade instead of
//! hanging on a terminal prompt.

use std::process::Stdio;
use std::time::Duration;

use domain::common::error::DomainError;
use ports::secondary::command_runner::{CommandOutput, CommandRunner, CommandSpec};
use ports::secondary::firewall_backend::PortFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct TokioCommandRunner {
    use_sudo: bool,
    timeout: Duration,
}

impl TokioCommandRunner {
    pub fn new(use_sudo: bool, timeout: Duration) -> Self {
        Self { use_sudo, timeout }
    }

    fn command_for(&self, spec: &CommandSpec) -> Command {
        let mut cmd = if spec.privileged && self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(&spec.program);
            c
        } else {
            Command::new(&spec.program)
        };
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn execute(&self, spec: &CommandSpec, line: &str) -> Result<CommandOutput, DomainError> {
        let mut child = self
            .command_for(spec)
            .spawn()
            .map_err(|e| DomainError::Backend(format!("failed to start `{line}`: {e}")))?;

        if let Some(input) = &spec.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| DomainError::Backend(format!("`{line}`: writing stdin: {e}")))?;
            // Closing stdin lets the child see EOF.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DomainError::Backend(format!("`{line}`: {e}")))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl CommandRunner for TokioCommandRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> PortFuture<'a, CommandOutput> {
        Box::pin(async move {
            let line = spec.display();
            tracing::debug!(command = %line, privileged = spec.privileged, "running command");

            let output = match tokio::time::timeout(self.timeout, self.execute(spec, &line)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(command = %line, timeout = ?self.timeout, "command timed out");
                    return Err(DomainError::Timeout(format!(
                        "`{line}` did not finish within {}s",
                        self.timeout.as_secs()
                    )));
                }
            };

            if output.needs_authorization() {
                tracing::warn!(
                    command = %line,
                    "privilege escalation needs interactive authorization, running degraded"
                );
            } else if !output.success() {
                tracing::debug!(
                    command = %line,
                    code = ?output.code,
                    stderr = %output.stderr.trim(),
                    "command exited with failure"
                );
            }
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> TokioCommandRunner {
        TokioCommandRunner::new(false, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = runner()
            .run(&CommandSpec::new("echo").arg("hello"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let out = runner()
            .run(&CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let out = runner()
            .run(&CommandSpec::new("cat").stdin("private-key\n"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "private-key\n");
    }

    #[tokio::test]
    async fn missing_program_is_backend_error() {
        let err = runner()
            .run(&CommandSpec::new("definitely-not-a-real-binary-7f3a"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Backend(_)));
    }

    #[tokio::test]
    async fn hang_becomes_timeout() {
        let runner = TokioCommandRunner::new(false, Duration::from_millis(50));
        let err = runner
            .run(&CommandSpec::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn privileged_without_sudo_runs_directly() {
        let out = runner()
            .run(&CommandSpec::new("echo").arg("root").privileged())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "root");
    }

    #[test]
    fn privileged_with_sudo_is_wrapped() {
        let runner = TokioCommandRunner::new(true, Duration::from_secs(1));
        let cmd = runner.command_for(&CommandSpec::new("iptables").arg("-L").privileged());
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "sudo");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-n", "iptables", "-L"]);
    }
}
