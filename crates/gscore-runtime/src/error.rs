//! Runtime error types.

use gscore_core::TransportError;
use gscore_framework::{RegistryError, StoreError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running the core.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plugin settings could not be opened or written.
    #[error("Settings store error: {0}")]
    Store(#[from] StoreError),

    /// A plugin or service module could not be registered.
    #[error("Registration error: {0}")]
    Registry(#[from] RegistryError),

    /// The server could not bind or a transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// `start` was called on a running core.
    #[error("Runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
