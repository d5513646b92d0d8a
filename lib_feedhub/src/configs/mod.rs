//! # Configuration Modules
//!
//! Layered service configuration: defaults, JSON file, then env/CLI.

/// The service's settings and their validation.
pub mod service_config;

pub use service_config::{
    ClockKind, ClockSettings, ConfigError, CursorBackendKind, CursorSettings, ResolvedConfig, ServiceConfig,
    SourceKind, SourceSettings,
};
