use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::common::{ConfigError, default_true, invalid};
use crate::constants::DEFAULT_COMMAND_TIMEOUT;

/// How external commands are run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Prefix privileged commands with `sudo -n`.
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            use_sudo: true,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl SystemConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_secs == 0 {
            return Err(invalid("system.command_timeout_secs", "must be positive"));
        }
        Ok(())
    }
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}
