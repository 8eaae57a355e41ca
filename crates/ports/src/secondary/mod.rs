pub mod command_runner;
pub mod firewall_backend;
pub mod key_source;
pub mod peer_config_port;
pub mod registry_port;
pub mod tunnel_daemon_port;
