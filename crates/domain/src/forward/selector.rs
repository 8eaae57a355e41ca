//! netfilter rule selectors for port forwards.
//!
//! A forward is three rules: DNAT in `nat/PREROUTING`, an ACCEPT in
//! `filter/FORWARD` and a MASQUERADE in `nat/POSTROUTING`. Insert, check and
//! delete all use the same selector tuple so a delete always names exactly
//! what an insert created.

use super::entity::PortMapping;
use crate::common::entity::Protocol;

/// Rule-table mutation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Append,
    Check,
    Delete,
}

impl RuleOp {
    pub fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Check => "-C",
            Self::Delete => "-D",
        }
    }
}

/// One rule in one chain, minus the verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSelector {
    pub table: Option<&'static str>,
    pub chain: &'static str,
    pub matches: Vec<String>,
}

impl RuleSelector {
    /// Full argument vector for the rule-table tool.
    pub fn args(&self, op: RuleOp) -> Vec<String> {
        let mut args = Vec::with_capacity(self.matches.len() + 4);
        if let Some(table) = self.table {
            args.push("-t".to_string());
            args.push(table.to_string());
        }
        args.push(op.flag().to_string());
        args.push(self.chain.to_string());
        args.extend(self.matches.iter().cloned());
        args
    }
}

/// The three selectors realising `mapping`, in insertion order.
pub fn forward_selectors(
    public_interface: &str,
    tunnel_interface: &str,
    mapping: &PortMapping,
) -> [RuleSelector; 3] {
    let proto = mapping.protocol.as_str();
    let peer = mapping.peer_address.to_string();
    let public_port = mapping.public_port.to_string();
    let target_port = mapping.target_port.to_string();

    let dnat = RuleSelector {
        table: Some("nat"),
        chain: "PREROUTING",
        matches: strings(&[
            "-i",
            public_interface,
            "-p",
            proto,
            "--dport",
            &public_port,
            "-j",
            "DNAT",
            "--to-destination",
            &format!("{peer}:{target_port}"),
        ]),
    };

    let accept = RuleSelector {
        table: None,
        chain: "FORWARD",
        matches: strings(&[
            "-i",
            public_interface,
            "-o",
            tunnel_interface,
            "-p",
            proto,
            "-d",
            &peer,
            "--dport",
            &target_port,
            "-m",
            "state",
            "--state",
            "NEW,ESTABLISHED,RELATED",
            "-j",
            "ACCEPT",
        ]),
    };

    let masquerade = RuleSelector {
        table: Some("nat"),
        chain: "POSTROUTING",
        matches: strings(&[
            "-o",
            tunnel_interface,
            "-p",
            proto,
            "-d",
            &peer,
            "--dport",
            &target_port,
            "-j",
            "MASQUERADE",
        ]),
    };

    [dnat, accept, masquerade]
}

/// Whether `a` and `b` resolve to the same FORWARD and MASQUERADE rules.
///
/// Those two selectors are keyed on the peer side only, so distinct public
/// ports forwarding to one peer port share a single copy of each.
pub fn shares_peer_rules(a: &PortMapping, b: &PortMapping) -> bool {
    a.protocol == b.protocol && a.peer_address == b.peer_address && a.target_port == b.target_port
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Parse `iptables -t nat -L PREROUTING -n --line-numbers` output into the
/// DNAT mappings it lists. Non-DNAT rows and malformed rows are skipped.
///
/// ```text
/// num  target     prot opt source               destination
/// 1    DNAT       tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpt:8022 to:10.0.0.2:22
/// ```
pub fn parse_prerouting_listing(output: &str) -> Vec<PortMapping> {
    output.lines().filter_map(parse_dnat_row).collect()
}

fn parse_dnat_row(line: &str) -> Option<PortMapping> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.get(1) != Some(&"DNAT") {
        return None;
    }
    let protocol = Protocol::parse(parts.get(2)?)?;
    let public_port = parts
        .iter()
        .find_map(|p| p.strip_prefix("dpt:"))?
        .parse()
        .ok()?;
    let target = parts.iter().find_map(|p| p.strip_prefix("to:"))?;
    let (addr, port) = target.rsplit_once(':')?;

    Some(PortMapping {
        protocol,
        public_port,
        peer_address: addr.parse().ok()?,
        target_port: port.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ssh() -> PortMapping {
        PortMapping {
            protocol: Protocol::Tcp,
            public_port: 8022,
            peer_address: Ipv4Addr::new(10, 0, 0, 2),
            target_port: 22,
        }
    }

    #[test]
    fn dnat_selector_args() {
        let [dnat, _, _] = forward_selectors("eth0", "wg0", &ssh());
        assert_eq!(
            dnat.args(RuleOp::Append).join(" "),
            "-t nat -A PREROUTING -i eth0 -p tcp --dport 8022 -j DNAT --to-destination 10.0.0.2:22"
        );
    }

    #[test]
    fn forward_selector_has_no_table() {
        let [_, accept, _] = forward_selectors("eth0", "wg0", &ssh());
        assert_eq!(
            accept.args(RuleOp::Append).join(" "),
            "-A FORWARD -i eth0 -o wg0 -p tcp -d 10.0.0.2 --dport 22 -m state --state NEW,ESTABLISHED,RELATED -j ACCEPT"
        );
    }

    #[test]
    fn masquerade_selector_args() {
        let [_, _, masq] = forward_selectors("eth0", "wg0", &ssh());
        assert_eq!(
            masq.args(RuleOp::Append).join(" "),
            "-t nat -A POSTROUTING -o wg0 -p tcp -d 10.0.0.2 --dport 22 -j MASQUERADE"
        );
    }

    #[test]
    fn delete_uses_same_selector_as_insert() {
        for sel in forward_selectors("eth0", "wg0", &ssh()) {
            let add = sel.args(RuleOp::Append);
            let del = sel.args(RuleOp::Delete);
            assert_eq!(add.len(), del.len());
            let differing: Vec<_> = add.iter().zip(&del).filter(|(a, d)| a != d).collect();
            assert_eq!(differing.len(), 1);
            assert_eq!(differing[0], (&"-A".to_string(), &"-D".to_string()));
        }
    }

    #[test]
    fn peer_rules_shared_across_public_ports() {
        let other_port = PortMapping {
            public_port: 2222,
            ..ssh()
        };
        assert!(shares_peer_rules(&ssh(), &other_port));

        let udp = PortMapping {
            protocol: Protocol::Udp,
            ..ssh()
        };
        let other_peer = PortMapping {
            peer_address: Ipv4Addr::new(10, 0, 0, 3),
            ..ssh()
        };
        assert!(!shares_peer_rules(&ssh(), &udp));
        assert!(!shares_peer_rules(&ssh(), &other_peer));
    }

    #[test]
    fn parse_listing_legacy_names() {
        let output = "\
Chain PREROUTING (policy ACCEPT)
num  target     prot opt source               destination
1    DNAT       tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpt:8022 to:10.0.0.2:22
2    DNAT       udp  --  0.0.0.0/0            0.0.0.0/0            udp dpt:5353 to:10.0.0.3:53
3    DOCKER     all  --  0.0.0.0/0            0.0.0.0/0            ADDRTYPE match dst-type LOCAL
";
        let mappings = parse_prerouting_listing(output);
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0], ssh());
        assert_eq!(mappings[1].protocol, Protocol::Udp);
        assert_eq!(mappings[1].peer_address, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(mappings[1].target_port, 53);
    }

    #[test]
    fn parse_listing_numeric_protocol() {
        let output =
            "1    DNAT       6    --  0.0.0.0/0            0.0.0.0/0            tcp dpt:8022 to:10.0.0.2:22\n";
        assert_eq!(parse_prerouting_listing(output), vec![ssh()]);
    }

    #[test]
    fn parse_listing_skips_malformed_rows() {
        let output = "1    DNAT       tcp  --  0.0.0.0/0  0.0.0.0/0  tcp dpt:x to:10.0.0.2:22\n\
                      2    DNAT       tcp  --  0.0.0.0/0  0.0.0.0/0  tcp dpt:80\n";
        assert!(parse_prerouting_listing(output).is_empty());
    }
}
