//! ACL engine
//!
//! Decides whether a client starts enabled, which node ids it is denied by
//! default, whether an update changes a gateway's peer set, and which
//! address ranges go into the client's `AllowedIPs`.

use netmesh_common::{ExtClient, Network, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the deny list interacts with `AllowedIPs`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeniedRangePolicy {
    /// Denial is enforced on the gateway's peer set; ranges stay in the config
    #[default]
    PeerSet,
    /// Egress ranges exposed by denied nodes are left out of the config
    Strip,
}

impl std::str::FromStr for DeniedRangePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peer_set" => Ok(Self::PeerSet),
            "strip" => Ok(Self::Strip),
            other => Err(format!("unknown denied range policy '{}'", other)),
        }
    }
}

/// One range routed through an egress gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressRange {
    pub node_id: String,
    pub range: String,
}

/// Active egress ranges of a network, given its nodes in key order
pub fn egress_ranges(nodes: &[Node]) -> Vec<EgressRange> {
    nodes
        .iter()
        .filter(|n| n.is_egress_gateway)
        .flat_map(|n| {
            n.egress_ranges
                .iter()
                .filter(|r| !r.is_empty())
                .map(move |r| EgressRange {
                    node_id: n.id.clone(),
                    range: r.clone(),
                })
        })
        .collect()
}

/// Enabled state for a new client: the request wins, else the network policy
pub fn default_enabled(network: &Network, requested: Option<bool>) -> bool {
    requested.unwrap_or_else(|| network.allows_by_default())
}

/// Deny list for a new client.
///
/// Networks that allow by default start with an empty list; otherwise every
/// node except the client's own ingress gateway is denied.
pub fn default_denied_acls(network: &Network, nodes: &[Node], ingress_id: &str) -> BTreeSet<String> {
    if network.allows_by_default() {
        return BTreeSet::new();
    }
    nodes
        .iter()
        .filter(|n| n.id != ingress_id)
        .map(|n| n.id.clone())
        .collect()
}

/// Whether an update requires the gateway to recompute its peer set.
///
/// Only the size of the deny list is compared, so swapping one denied node
/// for another is not peer-affecting.
pub fn is_peer_affecting(old: &ExtClient, new: &ExtClient) -> bool {
    old.enabled != new.enabled || old.denied_acls.len() != new.denied_acls.len()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AclEngine {
    policy: DeniedRangePolicy,
}

impl AclEngine {
    pub fn new(policy: DeniedRangePolicy) -> Self {
        Self { policy }
    }

    /// Comma-joined `AllowedIPs` value for `client`.
    ///
    /// Order: network v4 range, network v6 range, then egress ranges in the
    /// order given.
    pub fn allowed_ips(&self, client: &ExtClient, network: &Network, egress: &[EgressRange]) -> String {
        let mut ranges: Vec<&str> = Vec::new();
        if !network.address_range.is_empty() {
            ranges.push(&network.address_range);
        }
        if !network.address_range6.is_empty() {
            ranges.push(&network.address_range6);
        }
        for e in egress {
            if self.policy == DeniedRangePolicy::Strip && client.denied_acls.contains(&e.node_id) {
                continue;
            }
            ranges.push(&e.range);
        }
        ranges.join(",")
    }
}
