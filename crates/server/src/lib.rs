//! netmesh API server
//!
//! Attaches external WireGuard peers to mesh networks through ingress
//! gateways, renders their tunnel configs and publishes the peer and DNS
//! events gateways need to stay in sync.

pub mod extclient;
pub mod qr;
pub mod seed;
pub mod server;
pub mod settings;
pub mod store;

pub use server::{build_state, router, serve};
pub use settings::ServerConfig;
pub use store::{SqliteStore, TopologyStore};
