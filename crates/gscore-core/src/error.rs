//! Unified error types for the gscore core layer.
//!
//! Registry and dispatch errors live in `gscore-framework`; this module only
//! covers what the wire model and the transport seam can fail with.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The peer closed the connection or the socket broke.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// No live connection is registered for the bot.
    #[error("bot '{bot_id}' is not connected")]
    NotConnected {
        /// The bot that was addressed.
        bot_id: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a `ConnectionClosed` error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a `NotConnected` error for the given bot.
    pub fn not_connected(bot_id: impl Into<String>) -> Self {
        Self::NotConnected {
            bot_id: bot_id.into(),
        }
    }

    /// Returns `true` if the error means the underlying connection is gone.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::NotConnected { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The frame was not valid JSON for the expected record.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame was valid but a field carried an unsupported value.
    #[error("unsupported {field}: {value}")]
    Unsupported {
        /// The offending field.
        field: &'static str,
        /// The value that was rejected.
        value: String,
    },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for frame decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;
