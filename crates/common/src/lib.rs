//! netmesh Common Library
//!
//! Topology records, the key-value record store, WireGuard key helpers and the
//! error taxonomy shared by the server and the CLI.

pub mod crypto;
pub mod db;
pub mod error;
pub mod keys;
pub mod types;

// Re-export commonly used types
pub use crypto::WgKeyPair;
pub use db::Database;
pub use error::{Error, ErrorKind, Result};
pub use types::*;

/// netmesh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".netmesh")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("topology.db")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
