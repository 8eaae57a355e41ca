//! Detection of the host's public (default-route) interface.

use ports::secondary::command_runner::{CommandRunner, CommandSpec};

pub const PF_FALLBACK_INTERFACE: &str = "en0";
pub const NETFILTER_FALLBACK_INTERFACE: &str = "eth0";

/// Interface of the default route on BSD/macOS (`route -n get default`).
pub async fn detect_bsd(runner: &dyn CommandRunner) -> String {
    let spec = CommandSpec::new("route").args(["-n", "get", "default"]);
    let detected = match runner.run(&spec).await {
        Ok(out) if out.success() => parse_route_get(&out.stdout),
        _ => None,
    };
    detected.unwrap_or_else(|| {
        tracing::debug!(fallback = PF_FALLBACK_INTERFACE, "default route interface not found");
        PF_FALLBACK_INTERFACE.to_string()
    })
}

/// Interface of the default route on Linux (`ip route show default`).
pub async fn detect_linux(runner: &dyn CommandRunner) -> String {
    let spec = CommandSpec::new("ip").args(["route", "show", "default"]);
    let detected = match runner.run(&spec).await {
        Ok(out) if out.success() => parse_ip_route(&out.stdout),
        _ => None,
    };
    detected.unwrap_or_else(|| {
        tracing::debug!(
            fallback = NETFILTER_FALLBACK_INTERFACE,
            "default route interface not found"
        );
        NETFILTER_FALLBACK_INTERFACE.to_string()
    })
}

fn parse_route_get(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("interface:")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn parse_ip_route(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "dev")?;
        tokens.next().map(str::to_string)
    })
}
