//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (resolve path, parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FirewallConfig (validated, immutable)
//!     → split into ConnectionLimits / TokenBucketParams / RelaySettings
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → listener applies limits, bucket parameters and relay settings live
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - Every field except the two addresses has a default
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, resolve_config_path, ConfigError};
pub use schema::FirewallConfig;
pub use schema::{LogFormat, ObservabilityConfig, RateLimiterConfig, ShutdownConfig, TokenBucketConfig};
pub use validation::{validate_config, ValidationError};
