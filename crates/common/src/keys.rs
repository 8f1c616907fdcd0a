//! Composite record keys
//!
//! Every topology record lives in one key-value table. Keys are
//! `<kind>/<id>` or `<kind>/<network>/<id>`, so a prefix scan over
//! `<kind>/<network>/` enumerates one network in key order.

pub const NETWORK_PREFIX: &str = "network/";
pub const HOST_PREFIX: &str = "host/";
pub const NODE_PREFIX: &str = "node/";
pub const EXT_CLIENT_PREFIX: &str = "extclient/";
pub const NETWORK_USER_PREFIX: &str = "networkuser/";
pub const ADDRESS_LEASE_PREFIX: &str = "lease/";

pub fn network(net_id: &str) -> String {
    format!("{}{}", NETWORK_PREFIX, net_id)
}

pub fn host(host_id: &str) -> String {
    format!("{}{}", HOST_PREFIX, host_id)
}

pub fn node(node_id: &str) -> String {
    format!("{}{}", NODE_PREFIX, node_id)
}

pub fn ext_client(network: &str, client_id: &str) -> String {
    format!("{}{}/{}", EXT_CLIENT_PREFIX, network, client_id)
}

pub fn ext_clients_in(network: &str) -> String {
    format!("{}{}/", EXT_CLIENT_PREFIX, network)
}

pub fn network_user(network: &str, user_id: &str) -> String {
    format!("{}{}/{}", NETWORK_USER_PREFIX, network, user_id)
}

/// Held by whichever client was allocated `address` in `network`
pub fn address_lease(network: &str, address: &str) -> String {
    format!("{}{}/{}", ADDRESS_LEASE_PREFIX, network, address)
}
