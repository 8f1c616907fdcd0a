//! netmesh CLI
//!
//! Command-line client for managing external WireGuard clients through the
//! netmesh API.

pub mod client;
pub mod commands;
pub mod output;
