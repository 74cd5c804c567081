//! Configuration subsystem.
//!
//! Environment variables are the configuration transport. `schema` defines
//! the structures, `loader` reads them from the process environment, and
//! `validation` checks semantic correctness before the server starts.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_from_env, ConfigError};
pub use schema::{
    AdminConfig, AuditConfig, BridgeConfig, BrokerConfig, HttpConfig, ObservabilityConfig,
};
pub use validation::{validate_config, ValidationError};
