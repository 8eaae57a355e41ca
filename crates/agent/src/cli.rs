use clap::{Parser, Subcommand, ValueEnum};
use domain::common::entity::ProtocolSelection;
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(
    name = "wg-gateway",
    about = "WireGuard peer provisioning and port-forward gateway",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format: text (default) or json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Output format
    #[arg(short, long, default_value = "table", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Display version information
    Version,

    /// Provision and remove VPN peers
    Peer {
        #[command(subcommand)]
        command: PeerCommand,
    },

    /// Manage public port forwards to peers
    Forward {
        #[command(subcommand)]
        command: ForwardCommand,
    },

    /// Show which peers are online
    Status,

    /// Report daemon, firewall, privilege and subnet state
    System,

    /// Compare the registry against the live configuration and rules
    Drift,
}

// ── Peers ───────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum PeerCommand {
    /// Create a peer: allocate an address, generate keys, update the tunnel
    Add {
        /// Unique peer name
        name: String,
        /// Free-form description
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Delete a peer and every forward that targets it
    Delete {
        /// Peer name or id
        peer: String,
    },
    /// List peers with their online status
    List,
    /// Print the client configuration for a peer
    Config {
        /// Peer name or id
        peer: String,
    },
}

// ── Forwards ────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum ForwardCommand {
    /// Forward a public port on this host to a port on a peer
    Add {
        /// Peer name or id
        peer: String,
        /// Port exposed on the gateway's public interface
        public_port: u16,
        /// Port on the peer
        target_port: u16,
        /// tcp, udp or both
        #[arg(short, long, default_value = "tcp")]
        protocol: ProtocolSelection,
    },
    /// Remove a forward
    Delete {
        /// Forward id
        id: u64,
    },
    /// Enable a disabled forward or disable an enabled one
    Toggle {
        /// Forward id
        id: u64,
    },
    /// List registered forwards
    List,
    /// List the forwards the firewall currently holds
    Live,
}

pub fn parse() -> Cli {
    Cli::parse()
}
