use std::future::Future;
use std::pin::Pin;

use super::firewall_backend::PortFuture;

/// An external command to run, optionally with escalated privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Run through the privilege-escalation wrapper when one is configured.
    pub privileged: bool,
    /// Bytes fed to the child's stdin.
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether escalation refused to run because it needed a password.
    pub fn needs_authorization(&self) -> bool {
        let err = self.stderr.to_ascii_lowercase();
        err.contains("password is required") || err.contains("a terminal is required")
    }
}

/// Process execution seam.
///
/// A non-zero exit is reported through [`CommandOutput`], not as an error;
/// `Err` means the command could not be run at all (spawn failure, I/O
/// error) or did not finish in time (`DomainError::Timeout`).
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> PortFuture<'a, CommandOutput>;

    /// Whether privileged commands can run without interactive
    /// authorization (`sudo -n true` when escalation is configured).
    fn can_escalate(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let probe = CommandSpec::new("true").privileged();
            matches!(self.run(&probe).await, Ok(out) if out.success())
        })
    }
}
