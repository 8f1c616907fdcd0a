//! External client engine
//!
//! - ACL engine: enablement, default deny lists, `AllowedIPs`
//! - Config resolver: WireGuard config text for one client
//! - Access gate: ownership and per-user quotas
//! - Propagator: peer and DNS events on the message bus
//!
//! [`ExtClientService`] ties them together for the HTTP routes.

pub mod access;
pub mod acl;
pub mod alloc;
pub mod bus;
pub mod names;
pub mod propagate;
pub mod resolver;
pub mod routes;
pub mod service;
pub mod validate;

pub use access::{AccessGate, Capabilities, Caller};
pub use acl::{AclEngine, DeniedRangePolicy};
pub use bus::{BroadcastBus, Event, MessageBus, NullBus, Topic, WebhookBus};
pub use propagate::{PropagationStats, Propagator};
pub use resolver::{ConfigFormat, ConfigResolver, PeerConfig};
pub use routes::extclient_router;
pub use service::ExtClientService;
pub use validate::ExtClientRequest;
