//! Topology record types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Interface MTU used when a host does not configure one
pub const DEFAULT_MTU: u32 = 1420;

/// A virtual network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub net_id: String,
    /// IPv4 range (CIDR), empty if the network is v6-only
    #[serde(default)]
    pub address_range: String,
    /// IPv6 range (CIDR), empty if the network is v4-only
    #[serde(default)]
    pub address_range6: String,
    /// Policy applied to newly created clients: "allow" or anything else
    #[serde(default)]
    pub default_acl: String,
    /// Keepalive in seconds, 0 disables it
    #[serde(default)]
    pub default_keepalive: u32,
}

impl Network {
    /// Whether new clients on this network start enabled.
    ///
    /// "yes" is the legacy spelling of "allow".
    pub fn allows_by_default(&self) -> bool {
        matches!(self.default_acl.as_str(), "allow" | "yes")
    }
}

/// A machine running the tunnel daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub public_key: String,
    pub endpoint_ip: IpAddr,
    pub listen_port: u16,
    #[serde(default)]
    pub proxy_enabled: bool,
    #[serde(default)]
    pub proxy_listen_port: u16,
    /// 0 means use [`DEFAULT_MTU`]
    #[serde(default)]
    pub mtu: u32,
}

impl Host {
    /// Port external peers must dial: the proxy port when proxying, else the listen port
    pub fn peer_listen_port(&self) -> u16 {
        if self.proxy_enabled && self.proxy_listen_port != 0 {
            self.proxy_listen_port
        } else {
            self.listen_port
        }
    }

    /// `ip:listen_port`, the WireGuard endpoint written into peer configs
    pub fn endpoint(&self) -> String {
        self.endpoint_with_port(self.listen_port)
    }

    /// `ip:port` of [`Host::peer_listen_port`], as recorded on attached clients
    pub fn peer_endpoint(&self) -> String {
        self.endpoint_with_port(self.peer_listen_port())
    }

    fn endpoint_with_port(&self, port: u16) -> String {
        match self.endpoint_ip {
            IpAddr::V4(ip) => format!("{}:{}", ip, port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, port),
        }
    }

    pub fn effective_mtu(&self) -> u32 {
        if self.mtu != 0 {
            self.mtu
        } else {
            DEFAULT_MTU
        }
    }
}

/// A host's membership in one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub host_id: String,
    pub network: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub address6: String,
    #[serde(default)]
    pub is_ingress_gateway: bool,
    #[serde(default)]
    pub is_egress_gateway: bool,
    /// Default DNS handed to clients of this ingress gateway, empty if none
    #[serde(default)]
    pub ingress_dns: String,
    #[serde(default)]
    pub egress_ranges: Vec<String>,
}

/// An external peer attached to one ingress gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtClient {
    pub client_id: String,
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub address6: String,
    #[serde(default)]
    pub dns: String,
    #[serde(default)]
    pub extra_allowed_ips: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Node ids this client may not reach
    #[serde(default)]
    pub denied_acls: BTreeSet<String>,
    /// Empty means administrator-owned
    #[serde(default)]
    pub owner_id: String,
    pub ingress_gateway_id: String,
    #[serde(default)]
    pub ingress_gateway_endpoint: String,
    pub network: String,
    #[serde(default)]
    pub last_modified: i64,
}

impl ExtClient {
    pub fn is_owned(&self) -> bool {
        !self.owner_id.is_empty()
    }
}

/// Access level of a non-administrative user within one network.
///
/// Variants are declared in ascending order so the derived `Ord` gives
/// `NoAccess < NetUser < NetAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    NoAccess,
    NetUser,
    NetAdmin,
}

impl Default for AccessLevel {
    fn default() -> Self {
        Self::NoAccess
    }
}

impl AccessLevel {
    pub fn at_least(self, other: AccessLevel) -> bool {
        self >= other
    }

    /// May see the network at all
    pub fn has_access(self) -> bool {
        self.at_least(AccessLevel::NetUser)
    }

    /// May create clients that count against a quota
    pub fn can_provision(self) -> bool {
        self.at_least(AccessLevel::NetUser)
    }

    /// Acts on any client in the network and ignores quotas
    pub fn is_net_admin(self) -> bool {
        self.at_least(AccessLevel::NetAdmin)
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAccess => write!(f, "no_access"),
            Self::NetUser => write!(f, "net_user"),
            Self::NetAdmin => write!(f, "net_admin"),
        }
    }
}

/// A tenant's scoped identity within one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkUser {
    pub id: String,
    pub network: String,
    #[serde(default)]
    pub access_level: AccessLevel,
    #[serde(default)]
    pub client_limit: usize,
    #[serde(default)]
    pub clients: Vec<String>,
    /// Store version this copy was read at
    #[serde(default)]
    pub version: u64,
}

impl NetworkUser {
    pub fn owns(&self, client_id: &str) -> bool {
        self.clients.iter().any(|c| c == client_id)
    }

    pub fn under_quota(&self) -> bool {
        self.access_level.is_net_admin() || self.clients.len() < self.client_limit
    }

    /// Record ownership of `client_id`. Returns false if already recorded.
    pub fn associate(&mut self, client_id: &str) -> bool {
        if self.owns(client_id) {
            return false;
        }
        self.clients.push(client_id.to_string());
        true
    }

    /// Drop ownership of `client_id`. Returns false if it was not recorded.
    pub fn dissociate(&mut self, client_id: &str) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c != client_id);
        self.clients.len() != before
    }
}
