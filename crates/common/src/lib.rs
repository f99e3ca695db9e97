// Shared types for the WAF: data model, configuration, error taxonomy, and
// the narrow ports (KV store, record store, connection telemetry) the
// pipeline depends on instead of any concrete backend.

pub mod config;
pub mod crypto;
pub mod error;
pub mod memory;
pub mod model;
pub mod ports;

pub use config::Config;
pub use error::WafError;
