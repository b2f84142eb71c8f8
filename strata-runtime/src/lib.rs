//! STRATA Runtime - Process wiring
//!
//! Environment configuration, tracing setup, the engine [`Registry`], and
//! the provisioning service behind the `strata-provisioner` binary.

pub mod config;
pub mod provisioner;
pub mod registry;
pub mod telemetry;

pub use config::RuntimeConfig;
pub use provisioner::TablesFile;
pub use registry::{Engine, EngineGroup, EngineGroupOptions, EngineOptions, GroupPolicy, Registry};
pub use telemetry::{init_tracing, TelemetryConfig};
