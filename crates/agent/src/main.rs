#![forbid(unsafe_code)]

mod cli;
mod commands;
mod startup;

use std::path::Path;

use anyhow::Result;
use infrastructure::config::GatewayConfig;
use infrastructure::constants::DEFAULT_CONFIG_PATH;
use infrastructure::logging::init_logging;

use cli::{Command, ForwardCommand, PeerCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();
    let output = cli.output;

    if let Command::Version = cli.command {
        println!("wg-gateway {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // An explicitly named config file must exist; the default may not.
    let config_path = Path::new(&cli.config);
    let config = if cli.config == DEFAULT_CONFIG_PATH {
        GatewayConfig::load_or_default(config_path)?
    } else {
        GatewayConfig::load(config_path)?
    };

    init_logging(
        cli.log_level.unwrap_or(config.agent.log_level),
        cli.log_format.unwrap_or(config.agent.log_format),
    )?;
    tracing::debug!(config = %config_path.display(), "configuration loaded");

    let gateway = startup::build(config.settings()?).await?;

    match cli.command {
        Command::Version => Ok(()),

        Command::Peer { command } => match command {
            PeerCommand::Add { name, description } => {
                commands::cmd_peer_add(&gateway, &name, &description, output).await
            }
            PeerCommand::Delete { peer } => {
                commands::cmd_peer_delete(&gateway, &peer, output).await
            }
            PeerCommand::List => commands::cmd_peer_list(&gateway, output).await,
            PeerCommand::Config { peer } => commands::cmd_peer_config(&gateway, &peer, output),
        },

        Command::Forward { command } => match command {
            ForwardCommand::Add {
                peer,
                public_port,
                target_port,
                protocol,
            } => {
                commands::cmd_forward_add(
                    &gateway,
                    &peer,
                    public_port,
                    target_port,
                    protocol,
                    output,
                )
                .await
            }
            ForwardCommand::Delete { id } => {
                commands::cmd_forward_delete(&gateway, id, output).await
            }
            ForwardCommand::Toggle { id } => {
                commands::cmd_forward_toggle(&gateway, id, output).await
            }
            ForwardCommand::List => commands::cmd_forward_list(&gateway, output),
            ForwardCommand::Live => commands::cmd_forward_live(&gateway, output).await,
        },

        Command::Status => commands::cmd_status(&gateway, output).await,
        Command::System => commands::cmd_system(&gateway, output).await,
        Command::Drift => commands::cmd_drift(&gateway, output).await,
    }
}
