//! Configuration for the gscore runtime.
//!
//! Settings are layered with figment (defaults, profile file, main file,
//! `GSCORE_*` environment variables, programmatic merges) and checked by
//! [`validate_config`] before use.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{
    ClientConfig, GsCoreConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ServerConfig,
    SpanEventConfig, StoreConfig,
};
pub use validation::validate_config;
