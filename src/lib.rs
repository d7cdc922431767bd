//! Database connection firewall library.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod relay;
pub mod security;

pub use config::schema::FirewallConfig;
pub use lifecycle::Shutdown;
pub use net::Listener;
