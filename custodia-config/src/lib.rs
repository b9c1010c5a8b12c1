//! Configuration loading and process setup shared by Custodia binaries.

/// Config file discovery and parsing.
pub mod loader;
/// Tracing subscriber setup.
pub mod telemetry;

pub use loader::{ConfigSource, load_from_env, load_from_file};
