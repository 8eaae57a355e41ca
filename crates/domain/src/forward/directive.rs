//! pf anchor directives for port forwards.
//!
//! Each forward is rendered as a redirect (`rdr pass`) directive plus a
//! masquerade (`nat`) directive. Both are generated here and only here, so
//! the parser below can rely on the exact token layout:
//!
//! ```text
//! rdr pass on en0 inet proto tcp from any to any port 8022 -> 10.0.0.2 port 22
//! nat on en0 inet proto tcp from 10.0.0.2 to any -> (en0)
//! ```

use std::net::Ipv4Addr;

use crate::common::entity::Protocol;

use super::entity::PortMapping;

/// Destination-rewrite directive for `mapping` arriving on `interface`.
pub fn redirect_directive(interface: &str, mapping: &PortMapping) -> String {
    format!(
        "rdr pass on {interface} inet proto {} from any to any port {} -> {} port {}",
        mapping.protocol, mapping.public_port, mapping.peer_address, mapping.target_port
    )
}

/// Masquerade directive for traffic leaving `peer_address` via `interface`.
pub fn masquerade_directive(interface: &str, peer_address: Ipv4Addr, protocol: Protocol) -> String {
    format!("nat on {interface} inet proto {protocol} from {peer_address} to any -> ({interface})")
}

/// Parse a redirect directive back into the mapping it encodes.
pub fn parse_redirect(line: &str) -> Option<PortMapping> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.first() != Some(&"rdr") {
        return None;
    }
    let arrow = parts.iter().position(|p| *p == "->")?;
    let (lhs, rhs) = parts.split_at(arrow);

    let protocol = value_after(lhs, "proto").and_then(Protocol::parse)?;
    let public_port = value_after(lhs, "port")?.parse().ok()?;
    let peer_address = rhs.get(1)?.parse().ok()?;
    let target_port = value_after(rhs, "port")?.parse().ok()?;

    Some(PortMapping {
        protocol,
        public_port,
        peer_address,
        target_port,
    })
}

/// Parse a masquerade directive into its `(source address, protocol)`.
pub fn parse_masquerade(line: &str) -> Option<(Ipv4Addr, Protocol)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.first() != Some(&"nat") {
        return None;
    }
    let protocol = value_after(&parts, "proto").and_then(Protocol::parse)?;
    let source = value_after(&parts, "from")?.parse().ok()?;
    Some((source, protocol))
}

fn value_after<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    let idx = tokens.iter().position(|t| *t == key)?;
    tokens.get(idx + 1).copied()
}

/// Ordered directive list held in the anchor file.
///
/// Lines this component did not generate (comments, hand-written rules) are
/// kept in place and never matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorRules {
    lines: Vec<String>,
}

impl AnchorRules {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Add the redirect and masquerade directives for `mapping`, each only
    /// if an identical line is not already present. Returns whether the
    /// directive list changed.
    pub fn apply(&mut self, interface: &str, mapping: &PortMapping) -> bool {
        let wanted = [
            redirect_directive(interface, mapping),
            masquerade_directive(interface, mapping.peer_address, mapping.protocol),
        ];
        let mut changed = false;
        for directive in wanted {
            if !self.lines.iter().any(|l| l.trim() == directive) {
                self.lines.push(directive);
                changed = true;
            }
        }
        changed
    }

    /// Drop every redirect that references the mapping's public port, peer
    /// address and protocol. The masquerade directive for the same address
    /// and protocol goes too, unless another redirect still targets it.
    /// Returns whether the directive list changed.
    pub fn retract(&mut self, mapping: &PortMapping) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| {
            !parse_redirect(line).is_some_and(|m| {
                m.public_port == mapping.public_port
                    && m.peer_address == mapping.peer_address
                    && m.protocol == mapping.protocol
            })
        });

        let still_referenced = self.lines.iter().filter_map(|l| parse_redirect(l)).any(|m| {
            m.peer_address == mapping.peer_address && m.protocol == mapping.protocol
        });
        if !still_referenced {
            self.lines.retain(|line| {
                parse_masquerade(line) != Some((mapping.peer_address, mapping.protocol))
            });
        }

        self.lines.len() != before
    }

    /// Every mapping encoded by a redirect directive, in file order.
    pub fn mappings(&self) -> Vec<PortMapping> {
        self.lines.iter().filter_map(|l| parse_redirect(l)).collect()
    }
}
