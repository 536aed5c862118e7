//! Error types for the gscore framework.

use thiserror::Error;

/// Errors raised while registering plugins, service modules and triggers.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A plugin or service module was created without a name.
    #[error("{kind} name must not be empty")]
    InvalidName {
        /// `"plugin"` or `"sv"`.
        kind: &'static str,
    },

    /// A command or regex trigger key did not compile.
    #[error("invalid trigger pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The effective key that failed.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// The configuration store rejected a write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A configuration store failure.
#[derive(Debug, Clone, Error)]
#[error("config store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Creates a store error from any displayable cause.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A failure inside a dispatched handler.
///
/// Caught at the dispatch boundary and logged; it never reaches the receive
/// loop or other sessions.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler failed: {0:#}")]
    Failed(anyhow::Error),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Builds a [`HandlerError::Panicked`] from a panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(msg)
    }
}

/// Errors from multi-step conversation helpers on [`Bot`](crate::Bot).
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// No reply arrived in time.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// The session ended before a reply arrived.
    #[error("session '{0}' is no longer active")]
    Inactive(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
