use std::collections::HashMap;
use std::net::Ipv4Addr;

use adapters::tunnel::wg_keys::read_server_public_key;
use anyhow::{Result, bail};
use application::status_probe::status_of;
use domain::common::entity::{ForwardId, ProtocolSelection};
use domain::forward::entity::{ForwardRule, PortMapping};
use domain::peer::entity::Peer;
use domain::status::entity::PeerStatus;
use domain::tunnel::client_config::ClientConfig;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::startup::Gateway;

/// Peer as shown to operators. The private key never leaves `peer config`.
#[derive(Debug, Serialize)]
struct PeerView<'a> {
    id: u64,
    name: &'a str,
    description: &'a str,
    tunnel_address: Ipv4Addr,
    public_key: &'a str,
    created_at: u64,
    #[serde(flatten)]
    status: PeerStatus,
}

impl<'a> PeerView<'a> {
    fn new(peer: &'a Peer, status: PeerStatus) -> Self {
        Self {
            id: peer.id.0,
            name: &peer.name,
            description: &peer.description,
            tunnel_address: peer.tunnel_address,
            public_key: &peer.public_key,
            created_at: peer.created_at,
            status,
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Peers ───────────────────────────────────────────────────────────────

pub async fn cmd_peer_add(
    gw: &Gateway,
    name: &str,
    description: &str,
    output: OutputFormat,
) -> Result<()> {
    let peer = gw.service.add_peer(name, description).await?;

    if output == OutputFormat::Json {
        return print_json(&PeerView::new(&peer, PeerStatus::unknown()));
    }

    println!(
        "Peer created: {} (id={}, address={})",
        peer.name, peer.id, peer.tunnel_address
    );
    println!("Run `wg-gateway peer config {}` for the client configuration.", peer.name);
    Ok(())
}

pub async fn cmd_peer_delete(gw: &Gateway, reference: &str, output: OutputFormat) -> Result<()> {
    let peer = gw.service.resolve_peer(reference)?;
    let deleted = gw.service.delete_peer(peer.id).await?;

    if output == OutputFormat::Json {
        let body = serde_json::json!({
            "id": deleted.peer.id,
            "name": deleted.peer.name,
            "forwards_removed": deleted.forwards_removed,
            "warnings": deleted.warnings,
        });
        return print_json(&body);
    }

    println!(
        "Peer deleted: {} ({} forward(s) removed)",
        deleted.peer.name, deleted.forwards_removed
    );
    for warning in &deleted.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

pub async fn cmd_peer_list(gw: &Gateway, output: OutputFormat) -> Result<()> {
    let peers = gw.service.list_peers()?;
    let statuses = gw.probe.peer_statuses().await;
    let forwards = gw.service.list_forwards()?;

    let views: Vec<PeerView<'_>> = peers
        .iter()
        .map(|p| PeerView::new(p, status_of(&statuses, &p.public_key)))
        .collect();

    if output == OutputFormat::Json {
        return print_json(&views);
    }

    if views.is_empty() {
        println!("No peers provisioned.");
        return Ok(());
    }

    let now = now_secs();
    println!(
        "{:>4}  {:<20}  {:<15}  {:<7}  {:<16}  {:>8}  {:<24}",
        "ID", "NAME", "ADDRESS", "ONLINE", "LAST HANDSHAKE", "FORWARDS", "DESCRIPTION"
    );
    for view in &views {
        let forward_count = forwards.iter().filter(|f| f.peer_id.0 == view.id).count();
        println!(
            "{:>4}  {:<20}  {:<15}  {:<7}  {:<16}  {:>8}  {:<24}",
            view.id,
            truncate(view.name, 20),
            view.tunnel_address,
            yes_no(view.status.online),
            format_handshake(view.status.last_handshake, now),
            forward_count,
            truncate(view.description, 24),
        );
    }

    println!("\n{} peer(s) total.", views.len());
    Ok(())
}

pub fn cmd_peer_config(gw: &Gateway, reference: &str, output: OutputFormat) -> Result<()> {
    let peer = gw.service.resolve_peer(reference)?;
    let server_public_key = read_server_public_key(&gw.settings.server_public_key_path)?;

    let rendered = ClientConfig {
        private_key: &peer.private_key,
        address: peer.tunnel_address,
        prefix_len: gw.service.pool().prefix_len(),
        dns: &gw.settings.client_dns,
        server_public_key: &server_public_key,
        endpoint: &gw.settings.endpoint,
    }
    .render();

    if output == OutputFormat::Json {
        let body = serde_json::json!({
            "name": peer.name,
            "config": rendered,
        });
        return print_json(&body);
    }

    print!("{rendered}");
    Ok(())
}

// ── Forwards ────────────────────────────────────────────────────────────

pub async fn cmd_forward_add(
    gw: &Gateway,
    reference: &str,
    public_port: u16,
    target_port: u16,
    protocol: ProtocolSelection,
    output: OutputFormat,
) -> Result<()> {
    let peer = gw.service.resolve_peer(reference)?;
    let created = gw
        .service
        .add_forward(peer.id, public_port, target_port, protocol)
        .await?;

    if output == OutputFormat::Json {
        return print_json(&created);
    }

    for rule in &created {
        println!("Forward created: {} ({})", rule.id, describe(rule, &peer.name));
    }
    Ok(())
}

pub async fn cmd_forward_delete(gw: &Gateway, id: u64, output: OutputFormat) -> Result<()> {
    let rule = gw.service.remove_forward(ForwardId(id)).await?;

    if output == OutputFormat::Json {
        return print_json(&rule);
    }

    println!("Forward deleted: {} ({})", rule.id, rule.mapping());
    Ok(())
}

pub async fn cmd_forward_toggle(gw: &Gateway, id: u64, output: OutputFormat) -> Result<()> {
    let rule = gw.service.toggle_forward(ForwardId(id)).await?;

    if output == OutputFormat::Json {
        return print_json(&rule);
    }

    let state = if rule.enabled { "enabled" } else { "disabled" };
    println!("Forward {state}: {} ({})", rule.id, rule.mapping());
    Ok(())
}

pub fn cmd_forward_list(gw: &Gateway, output: OutputFormat) -> Result<()> {
    let forwards = gw.service.list_forwards()?;

    if output == OutputFormat::Json {
        return print_json(&forwards);
    }

    if forwards.is_empty() {
        println!("No forwards configured.");
        return Ok(());
    }

    let names: HashMap<u64, String> = gw
        .service
        .list_peers()?
        .into_iter()
        .map(|p| (p.id.0, p.name))
        .collect();

    println!(
        "{:>4}  {:<20}  {:>6}  {:<5}  {:<21}  {:<7}",
        "ID", "PEER", "PUBLIC", "PROTO", "TARGET", "ENABLED"
    );
    for rule in &forwards {
        let peer = names.get(&rule.peer_id.0).map_or("-", String::as_str);
        println!(
            "{:>4}  {:<20}  {:>6}  {:<5}  {:<21}  {:<7}",
            rule.id,
            truncate(peer, 20),
            rule.public_port,
            rule.protocol,
            format!("{}:{}", rule.peer_address, rule.target_port),
            yes_no(rule.enabled),
        );
    }

    println!("\n{} forward(s) total.", forwards.len());
    Ok(())
}

pub async fn cmd_forward_live(gw: &Gateway, output: OutputFormat) -> Result<()> {
    let mut live = gw.firewall.list().await?;
    live.sort();

    if output == OutputFormat::Json {
        return print_json(&live);
    }

    if live.is_empty() {
        println!("No forwards active in {}.", gw.firewall.name());
        return Ok(());
    }

    println!("{:>6}  {:<5}  {:<21}", "PUBLIC", "PROTO", "TARGET");
    for mapping in &live {
        println!(
            "{:>6}  {:<5}  {:<21}",
            mapping.public_port,
            mapping.protocol,
            format!("{}:{}", mapping.peer_address, mapping.target_port),
        );
    }
    Ok(())
}

// ── Status & system ─────────────────────────────────────────────────────

pub async fn cmd_status(gw: &Gateway, output: OutputFormat) -> Result<()> {
    let peers = gw.service.list_peers()?;
    let statuses = gw.probe.peer_statuses().await;
    let summary = gw.service.subnet_summary()?;

    let views: Vec<PeerView<'_>> = peers
        .iter()
        .map(|p| PeerView::new(p, status_of(&statuses, &p.public_key)))
        .collect();
    let online = views.iter().filter(|v| v.status.online).count();

    if output == OutputFormat::Json {
        let body = serde_json::json!({
            "online": online,
            "peers": views,
            "subnet": summary,
        });
        return print_json(&body);
    }

    let now = now_secs();
    println!("Gateway Status");
    println!("  Subnet:      {} (server {})", summary.subnet, summary.server_address);
    println!(
        "  Addresses:   {} used, {} free of {}",
        summary.allocated.len(),
        summary.available,
        summary.total_hosts
    );
    println!("  Peers:       {online}/{} online", views.len());
    for view in &views {
        println!(
            "    {:<20}  {:<15}  {:<7}  {}",
            truncate(view.name, 20),
            view.tunnel_address,
            if view.status.online { "online" } else { "offline" },
            format_handshake(view.status.last_handshake, now),
        );
    }
    Ok(())
}

pub async fn cmd_system(gw: &Gateway, output: OutputFormat) -> Result<()> {
    let report = gw.inspector.report().await?;

    if output == OutputFormat::Json {
        let mut body = serde_json::to_value(&report)?;
        body["degraded"] = serde_json::Value::Bool(report.degraded());
        return print_json(&body);
    }

    println!("Gateway System");
    println!("  wg installed:     {}", yes_no(report.daemon_installed));
    println!(
        "  Interface:        {} ({})",
        report.interface.interface,
        if report.interface.running { "up" } else { "down" }
    );
    println!("  Firewall:         {}", report.firewall_backend);
    println!("  Firewall ready:   {}", yes_no(report.firewall_configured));
    println!("  Privileged:       {}", yes_no(report.privileged));
    println!(
        "  Subnet:           {} ({} of {} free)",
        report.subnet.subnet, report.subnet.available, report.subnet.total_hosts
    );
    println!("  Peers:            {}", report.peers);
    println!(
        "  Forwards:         {} ({} enabled)",
        report.forwards, report.enabled_forwards
    );
    if report.degraded() {
        println!("\nDegraded: changes are written to files but may not reach the running system.");
    }
    Ok(())
}

pub async fn cmd_drift(gw: &Gateway, output: OutputFormat) -> Result<()> {
    let drift = gw.inspector.drift().await?;

    if output == OutputFormat::Json {
        print_json(&drift)?;
    } else if drift.is_clean() {
        println!("No drift: configuration file and firewall match the registry.");
    } else {
        print_list("Peers missing from the configuration file", &drift.missing_blocks);
        print_list("Unknown peer blocks (public keys)", &drift.unexpected_blocks);
        print_list("Forwards missing from the firewall", &mappings(&drift.missing_rules));
        print_list("Unknown firewall forwards", &mappings(&drift.unexpected_rules));
    }

    if !drift.is_clean() {
        bail!("drift detected");
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{title}:");
    for item in items {
        println!("  - {item}");
    }
}

fn mappings(rules: &[PortMapping]) -> Vec<String> {
    rules.iter().map(ToString::to_string).collect()
}

fn describe(rule: &ForwardRule, peer: &str) -> String {
    format!(
        "{}/{} -> {peer} {}:{}",
        rule.public_port, rule.protocol, rule.peer_address, rule.target_port
    )
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

fn yes_no(val: bool) -> &'static str {
    if val { "yes" } else { "no" }
}

fn format_handshake(last: Option<u64>, now: u64) -> String {
    match last {
        Some(ts) => format!("{} ago", format_age(now.saturating_sub(ts))),
        None => "never".to_string(),
    }
}

fn format_age(seconds: u64) -> String {
    let d = seconds / 86_400;
    let h = (seconds % 86_400) / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if d > 0 {
        format!("{d}d {h:02}h")
    } else if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::common::entity::PeerId;

    fn peer() -> Peer {
        Peer {
            id: PeerId(3),
            name: "laptop".to_string(),
            description: "work".to_string(),
            tunnel_address: Ipv4Addr::new(10, 0, 0, 2),
            public_key: "cHVibGlj".to_string(),
            private_key: "cHJpdmF0ZQ==".to_string(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn peer_view_omits_private_key() {
        let peer = peer();
        let json = serde_json::to_value(PeerView::new(&peer, PeerStatus::classify(Some(100), 150)))
            .unwrap();
        assert_eq!(json["name"], "laptop");
        assert_eq!(json["online"], true);
        assert_eq!(json["last_handshake"], 100);
        assert!(json.get("private_key").is_none());
        assert!(!json.to_string().contains("cHJpdmF0ZQ=="));
    }

    #[test]
    fn format_age_seconds_only() {
        assert_eq!(format_age(42), "42s");
    }

    #[test]
    fn format_age_minutes_and_seconds() {
        assert_eq!(format_age(125), "2m 05s");
    }

    #[test]
    fn format_age_hours_and_days() {
        assert_eq!(format_age(3723), "1h 02m");
        assert_eq!(format_age(90_000), "1d 01h");
    }

    #[test]
    fn format_handshake_never() {
        assert_eq!(format_handshake(None, 1000), "never");
        assert_eq!(format_handshake(Some(990), 1000), "10s ago");
    }

    #[test]
    fn truncate_keeps_short_names() {
        assert_eq!(truncate("laptop", 20), "laptop");
        assert_eq!(truncate("a-very-long-peer-name-indeed", 10), "a-very-...");
    }

    #[test]
    fn yes_no_values() {
        assert_eq!(yes_no(true), "yes");
        assert_eq!(yes_no(false), "no");
    }

    #[test]
    fn describe_names_peer() {
        let rule = ForwardRule {
            id: ForwardId(1),
            peer_id: PeerId(3),
            peer_address: Ipv4Addr::new(10, 0, 0, 2),
            public_port: 8022,
            target_port: 22,
            protocol: domain::common::entity::Protocol::Tcp,
            enabled: true,
            created_at: 0,
        };
        assert_eq!(describe(&rule, "laptop"), "8022/tcp -> laptop 10.0.0.2:22");
    }
}
