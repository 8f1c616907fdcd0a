//! Address allocation for new clients

use ipnetwork::{Ipv4Network, Ipv6Network};
use netmesh_common::{Error, ExtClient, Node, Result};
use std::collections::HashSet;
use std::net::IpAddr;

/// Upper bound on v6 candidates examined per allocation
const MAX_V6_SCAN: usize = 1 << 16;

/// Addresses already held by nodes and clients of one network
pub fn used_addresses(nodes: &[Node], clients: &[ExtClient]) -> HashSet<IpAddr> {
    let node_addrs = nodes.iter().flat_map(|n| [&n.address, &n.address6]);
    let client_addrs = clients.iter().flat_map(|c| [&c.address, &c.address6]);
    node_addrs
        .chain(client_addrs)
        .filter_map(|a| parse_host(a))
        .collect()
}

/// Accepts `10.0.0.1` as well as `10.0.0.1/24`
fn parse_host(addr: &str) -> Option<IpAddr> {
    addr.split('/').next()?.trim().parse().ok()
}

/// First free host address in a v4 range. Empty range yields an empty string.
pub fn allocate_v4(range: &str, used: &HashSet<IpAddr>) -> Result<String> {
    if range.is_empty() {
        return Ok(String::new());
    }
    let net: Ipv4Network = range
        .parse()
        .map_err(|e| Error::internal(format!("invalid network range {}: {}", range, e)))?;

    // /31 and /32 have no network or broadcast address to skip
    let skip_edges = net.prefix() < 31;
    net.iter()
        .filter(|ip| !(skip_edges && (*ip == net.network() || *ip == net.broadcast())))
        .find(|ip| !used.contains(&IpAddr::V4(*ip)))
        .map(|ip| ip.to_string())
        .ok_or_else(|| Error::internal(format!("no free addresses in {}", range)))
}

/// First free host address in a v6 range. Empty range yields an empty string.
pub fn allocate_v6(range: &str, used: &HashSet<IpAddr>) -> Result<String> {
    if range.is_empty() {
        return Ok(String::new());
    }
    let net: Ipv6Network = range
        .parse()
        .map_err(|e| Error::internal(format!("invalid network range {}: {}", range, e)))?;

    net.iter()
        .skip(1)
        .take(MAX_V6_SCAN)
        .find(|ip| !used.contains(&IpAddr::V6(*ip)))
        .map(|ip| ip.to_string())
        .ok_or_else(|| Error::internal(format!("no free addresses in {}", range)))
}
