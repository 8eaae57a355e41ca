use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::Serialize;

use super::error::AllocatorError;

/// Longest prefix that still has distinct network and broadcast addresses.
pub const MAX_POOL_PREFIX: u8 = 30;

/// Tunnel address pool: the host addresses of one IPv4 subnet, minus the
/// gateway's own address.
///
/// The pool is stateless. Which addresses are taken is always derived from
/// the caller-supplied assignment list, so a deleted peer's address becomes
/// free again without any bookkeeping here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    subnet: Ipv4Network,
    server_address: Ipv4Addr,
}

impl AddressPool {
    pub fn new(subnet: Ipv4Network, server_address: Ipv4Addr) -> Result<Self, AllocatorError> {
        if subnet.ip() != subnet.network() {
            return Err(AllocatorError::InvalidSubnet(format!(
                "{subnet} has host bits set (did you mean {}/{}?)",
                subnet.network(),
                subnet.prefix()
            )));
        }
        if subnet.prefix() > MAX_POOL_PREFIX {
            return Err(AllocatorError::InvalidSubnet(format!(
                "{subnet} is too small, prefix must be /{MAX_POOL_PREFIX} or shorter"
            )));
        }
        let pool = Self {
            subnet,
            server_address,
        };
        if !pool.is_in_subnet(server_address) {
            return Err(AllocatorError::ServerOutsideSubnet {
                address: server_address,
                subnet: subnet.to_string(),
            });
        }
        Ok(pool)
    }

    /// Parse a CIDR string such as `10.0.0.0/24`.
    pub fn parse(subnet: &str, server_address: Ipv4Addr) -> Result<Self, AllocatorError> {
        let net: Ipv4Network = subnet
            .trim()
            .parse()
            .map_err(|e| AllocatorError::InvalidSubnet(format!("{subnet}: {e}")))?;
        Self::new(net, server_address)
    }

    pub fn subnet(&self) -> Ipv4Network {
        self.subnet
    }

    pub fn server_address(&self) -> Ipv4Addr {
        self.server_address
    }

    pub fn prefix_len(&self) -> u8 {
        self.subnet.prefix()
    }

    /// Number of usable host addresses, server included.
    pub fn host_count(&self) -> u64 {
        (1u64 << (32 - u32::from(self.subnet.prefix()))) - 2
    }

    /// Whether `address` is a host address of the subnet (neither the
    /// network nor the broadcast address).
    pub fn is_in_subnet(&self, address: Ipv4Addr) -> bool {
        self.subnet.contains(address)
            && address != self.subnet.network()
            && address != self.subnet.broadcast()
    }

    /// Whether `address` could be handed to a new peer.
    pub fn is_available(&self, address: Ipv4Addr, assigned: &[Ipv4Addr]) -> bool {
        self.is_in_subnet(address) && address != self.server_address && !assigned.contains(&address)
    }

    /// Lowest host address that is neither the server's nor in `assigned`.
    pub fn next_address(&self, assigned: &[Ipv4Addr]) -> Result<Ipv4Addr, AllocatorError> {
        let reserved: HashSet<Ipv4Addr> = assigned
            .iter()
            .copied()
            .chain(std::iter::once(self.server_address))
            .collect();

        self.hosts()
            .find(|addr| !reserved.contains(addr))
            .ok_or_else(|| AllocatorError::Exhausted {
                subnet: self.subnet.to_string(),
            })
    }

    /// Host addresses in ascending order, network and broadcast excluded.
    fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.subnet.network()) + 1;
        let last = u32::from(self.subnet.broadcast());
        (first..last).map(Ipv4Addr::from)
    }

    pub fn summary(&self, assigned: &[Ipv4Addr]) -> SubnetSummary {
        let mut allocated: Vec<Ipv4Addr> = assigned
            .iter()
            .copied()
            .filter(|a| self.is_in_subnet(*a))
            .chain(std::iter::once(self.server_address))
            .collect();
        allocated.sort_unstable();
        allocated.dedup();

        let total_hosts = self.host_count();
        SubnetSummary {
            subnet: self.subnet.to_string(),
            server_address: self.server_address,
            total_hosts,
            available: total_hosts.saturating_sub(allocated.len() as u64),
            allocated,
        }
    }
}

/// Occupancy snapshot of the tunnel subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetSummary {
    pub subnet: String,
    pub server_address: Ipv4Addr,
    pub total_hosts: u64,
    pub available: u64,
    /// Sorted, server address included.
    pub allocated: Vec<Ipv4Addr>,
}
