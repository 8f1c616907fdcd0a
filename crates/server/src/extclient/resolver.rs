//! Config resolver
//!
//! Turns a stored client plus the current topology into the tunnel
//! configuration the client must run. Nothing here is persisted or cached;
//! every call reads the store fresh.

use super::acl::{egress_ranges, AclEngine};
use crate::store::TopologyStore;
use netmesh_common::{Error, ExtClient, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Output format of a config request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    /// The stored record as JSON
    #[default]
    Record,
    /// Rendered config text as a download
    File,
    /// Rendered config text as a PNG QR code
    Qr,
}

impl std::str::FromStr for ConfigFormat {
    type Err = std::convert::Infallible;

    /// Unknown formats fall back to the record.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "file" => Self::File,
            "qr" => Self::Qr,
            _ => Self::Record,
        })
    }
}

/// Fully resolved tunnel configuration for one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerConfig {
    pub address: String,
    pub private_key: String,
    pub mtu: u32,
    pub dns: Option<String>,
    pub gateway_public_key: String,
    pub allowed_ips: String,
    pub endpoint: String,
    pub keepalive: Option<u32>,
}

impl PeerConfig {
    /// Render as WireGuard config text. The trailing blank line is part of the format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[Interface]\n");
        out.push_str(&format!("Address = {}\n", self.address));
        out.push_str(&format!("PrivateKey = {}\n", self.private_key));
        out.push_str(&format!("MTU = {}\n", self.mtu));
        if let Some(dns) = &self.dns {
            out.push_str(&format!("DNS = {}\n", dns));
        }
        out.push('\n');
        out.push_str("[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", self.gateway_public_key));
        out.push_str(&format!("AllowedIPs = {}\n", self.allowed_ips));
        out.push_str(&format!("Endpoint = {}\n", self.endpoint));
        if let Some(keepalive) = self.keepalive {
            out.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
        }
        out.push('\n');
        out
    }
}

/// `Address` value: `v4/32`, `v6/128`, or both comma-joined
pub fn interface_address(address: &str, address6: &str) -> String {
    let mut parts = Vec::with_capacity(2);
    if !address.is_empty() {
        parts.push(format!("{}/32", address));
    }
    if !address6.is_empty() {
        parts.push(format!("{}/128", address6));
    }
    parts.join(",")
}

/// Client override first, then the gateway default
pub fn resolve_dns(client_dns: &str, gateway_dns: &str) -> Option<String> {
    [client_dns, gateway_dns]
        .into_iter()
        .find(|d| !d.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct ConfigResolver {
    store: Arc<dyn TopologyStore>,
    acl: AclEngine,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn TopologyStore>, acl: AclEngine) -> Self {
        Self { store, acl }
    }

    pub fn resolve(&self, client: &ExtClient) -> Result<PeerConfig> {
        let node = self
            .store
            .get_node(&client.ingress_gateway_id)?
            .ok_or_else(|| Error::not_found("node", &client.ingress_gateway_id))?;
        let host = self
            .store
            .get_host(&node.host_id)?
            .ok_or_else(|| Error::not_found("host", &node.host_id))?;
        // A client can only exist on a network that exists
        let network = self.store.get_network(&client.network)?.ok_or_else(|| {
            Error::internal(format!(
                "client {} references missing network {}",
                client.client_id, client.network
            ))
        })?;

        let nodes = self.store.list_nodes(&network.net_id)?;
        let egress = egress_ranges(&nodes);

        let config = PeerConfig {
            address: interface_address(&client.address, &client.address6),
            private_key: client.private_key.clone(),
            mtu: host.effective_mtu(),
            dns: resolve_dns(&client.dns, &node.ingress_dns),
            gateway_public_key: host.public_key.clone(),
            allowed_ips: self.acl.allowed_ips(client, &network, &egress),
            endpoint: host.endpoint(),
            keepalive: (network.default_keepalive != 0).then_some(network.default_keepalive),
        };

        debug!(
            "Resolved config for {}/{} via {}",
            client.network, client.client_id, config.endpoint
        );
        Ok(config)
    }
}
