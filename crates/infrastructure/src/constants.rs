use std::time::Duration;

// ── Paths ──────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wg-gateway/config.yaml";

/// Environment variable overriding the config path (the `--config` flag wins).
pub const CONFIG_PATH_ENV: &str = "WG_GATEWAY_CONFIG";

pub const DEFAULT_REGISTRY_PATH: &str = "/var/lib/wg-gateway/registry.redb";

pub const LINUX_WIREGUARD_DIR: &str = "/etc/wireguard";
pub const MACOS_WIREGUARD_DIR: &str = "/usr/local/etc/wireguard";

pub const SERVER_PUBLIC_KEY_FILE: &str = "server_public.key";

pub const DEFAULT_ANCHOR_FILE: &str = "/etc/pf.anchors/vpn-manager";
pub const DEFAULT_ANCHOR_NAME: &str = "vpn-manager";
pub const DEFAULT_PF_CONF: &str = "/etc/pf.conf";
pub const DEFAULT_NETFILTER_PERSIST_PATH: &str = "/etc/iptables/rules.v4";

// ── Tunnel defaults ────────────────────────────────────────────────

pub const DEFAULT_SUBNET: &str = "10.0.0.0/24";
pub const DEFAULT_SERVER_ADDRESS: [u8; 4] = [10, 0, 0, 1];
pub const DEFAULT_LISTEN_PORT: u16 = 51820;
pub const DEFAULT_TUNNEL_INTERFACE: &str = "wg0";

// ── Forward bounds ─────────────────────────────────────────────────

pub const DEFAULT_MIN_PUBLIC_PORT: u16 = 1024;
pub const DEFAULT_MAX_PUBLIC_PORT: u16 = 65535;

// ── Timeouts ───────────────────────────────────────────────────────

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Platform default for the tunnel daemon's configuration directory.
pub fn default_wireguard_dir() -> &'static str {
    if cfg!(target_os = "macos") {
        MACOS_WIREGUARD_DIR
    } else {
        LINUX_WIREGUARD_DIR
    }
}
