/// Console plus rolling JSON file logging via `tracing`.
pub mod tracing_setup;

pub use tracing_setup::{setup_logging, LoggingError};
