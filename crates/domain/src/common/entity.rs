use serde::{Deserialize, Serialize};

/// Registry identifier of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry identifier of a forward rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForwardId(pub u64);

impl std::fmt::Display for ForwardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport protocol of a stored forward rule.
///
/// Only single protocols are ever stored or handed to a firewall backend;
/// "both" exists solely as a [`ProtocolSelection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    /// IP protocol number, as printed by `iptables -n` on nft-backed hosts.
    pub fn number(self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
        }
    }

    /// Parse a protocol name or number. Case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "6" => Some(Self::Tcp),
            "udp" | "17" => Some(Self::Udp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol requested by an operator when adding a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolSelection {
    #[default]
    Tcp,
    Udp,
    Both,
}

impl ProtocolSelection {
    /// Expand into the concrete protocols, TCP first.
    pub fn expand(self) -> Vec<Protocol> {
        match self {
            Self::Tcp => vec![Protocol::Tcp],
            Self::Udp => vec![Protocol::Udp],
            Self::Both => vec![Protocol::Tcp, Protocol::Udp],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Both => "both",
        }
    }
}

impl std::fmt::Display for ProtocolSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "both" | "tcp+udp" => Ok(Self::Both),
            _ => Err(format!("invalid protocol '{s}': expected tcp|udp|both")),
        }
    }
}

impl From<Protocol> for ProtocolSelection {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Tcp => Self::Tcp,
            Protocol::Udp => Self::Udp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Protocol ──────────────────────────────────────────────────

    #[test]
    fn protocol_parse_names_and_numbers() {
        assert_eq!(Protocol::parse("tcp"), Some(Protocol::Tcp));
        assert_eq!(Protocol::parse("UDP"), Some(Protocol::Udp));
        assert_eq!(Protocol::parse("6"), Some(Protocol::Tcp));
        assert_eq!(Protocol::parse("17"), Some(Protocol::Udp));
        assert_eq!(Protocol::parse("icmp"), None);
        assert_eq!(Protocol::parse("both"), None);
    }

    #[test]
    fn protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }

    // ── ProtocolSelection ─────────────────────────────────────────

    #[test]
    fn both_expands_to_tcp_then_udp() {
        assert_eq!(
            ProtocolSelection::Both.expand(),
            vec![Protocol::Tcp, Protocol::Udp]
        );
    }

    #[test]
    fn single_selection_expands_to_itself() {
        assert_eq!(ProtocolSelection::Tcp.expand(), vec![Protocol::Tcp]);
        assert_eq!(ProtocolSelection::Udp.expand(), vec![Protocol::Udp]);
    }

    #[test]
    fn selection_from_str() {
        assert_eq!(
            "both".parse::<ProtocolSelection>().unwrap(),
            ProtocolSelection::Both
        );
        assert_eq!(
            "TCP".parse::<ProtocolSelection>().unwrap(),
            ProtocolSelection::Tcp
        );
        assert!("sctp".parse::<ProtocolSelection>().is_err());
    }

    #[test]
    fn ids_display_as_numbers() {
        assert_eq!(PeerId(7).to_string(), "7");
        assert_eq!(ForwardId(12).to_string(), "12");
    }
}
