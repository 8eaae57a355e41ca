use std::net::Ipv4Addr;

/// Keepalive interval pushed to clients, seconds.
pub const CLIENT_KEEPALIVE_SECS: u16 = 25;

/// Routes sent through the tunnel by default: everything.
pub const CLIENT_ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// Everything needed to render one peer's client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig<'a> {
    pub private_key: &'a str,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub dns: &'a [String],
    pub server_public_key: &'a str,
    pub endpoint: &'a str,
}

impl ClientConfig<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[Interface]\n");
        out.push_str(&format!("PrivateKey = {}\n", self.private_key));
        out.push_str(&format!("Address = {}/{}\n", self.address, self.prefix_len));
        if !self.dns.is_empty() {
            out.push_str(&format!("DNS = {}\n", self.dns.join(", ")));
        }
        out.push('\n');
        out.push_str("[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", self.server_public_key));
        out.push_str(&format!("Endpoint = {}\n", self.endpoint));
        out.push_str(&format!("AllowedIPs = {CLIENT_ALLOWED_IPS}\n"));
        out.push_str(&format!("PersistentKeepalive = {CLIENT_KEEPALIVE_SECS}\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_full_client_config() {
        let dns = vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()];
        let cfg = ClientConfig {
            private_key: "cHJpdmF0ZQ==",
            address: Ipv4Addr::new(10, 0, 0, 2),
            prefix_len: 24,
            dns: &dns,
            server_public_key: "c2VydmVy",
            endpoint: "vpn.example.net:51820",
        };
        assert_eq!(
            cfg.render(),
            "[Interface]\nPrivateKey = cHJpdmF0ZQ==\nAddress = 10.0.0.2/24\nDNS = 1.1.1.1, 8.8.8.8\n\n\
             [Peer]\nPublicKey = c2VydmVy\nEndpoint = vpn.example.net:51820\n\
             AllowedIPs = 0.0.0.0/0, ::/0\nPersistentKeepalive = 25\n"
        );
    }

    #[test]
    fn omits_empty_dns() {
        let cfg = ClientConfig {
            private_key: "k",
            address: Ipv4Addr::new(10, 0, 0, 9),
            prefix_len: 16,
            dns: &[],
            server_public_key: "s",
            endpoint: "127.0.0.1:51820",
        };
        let text = cfg.render();
        assert!(!text.contains("DNS"));
        assert!(text.contains("Address = 10.0.0.9/16\n"));
    }
}
