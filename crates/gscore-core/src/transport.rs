//! Transport seam between the core and concrete socket implementations.
//!
//! The core never touches a socket directly. A live connection is seen as a
//! [`Transport`] (something frames can be pushed into and that can be closed),
//! and socket servers report lifecycle events through a [`ConnectionHandler`].
//! `gscore-transport` provides the WebSocket implementations; the runtime
//! provides the handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::{TransportError, TransportResult};

/// Close code sent when the core drops a connection ("going away").
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

// =============================================================================
// Transport
// =============================================================================

/// A live, message-oriented connection to one bot adapter.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Pushes one encoded frame to the peer.
    async fn send(&self, data: Vec<u8>) -> TransportResult<()>;

    /// Closes the connection with the given close code.
    async fn close(&self, code: u16);
}

/// Shared transport handle.
pub type BoxedTransport = Arc<dyn Transport>;

// =============================================================================
// Connection Handler
// =============================================================================

/// Callbacks a socket server drives for every accepted connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Called once the connection is established.
    ///
    /// Returns a generation id identifying this particular connection, which
    /// is passed back to [`on_disconnect`](Self::on_disconnect).
    async fn on_connect(&self, bot_id: &str, info: ConnectionInfo, transport: BoxedTransport)
    -> u64;

    /// Called for every frame received, in arrival order.
    async fn on_message(&self, bot_id: &str, data: &[u8]);

    /// Called when the connection identified by `generation` is gone.
    async fn on_disconnect(&self, bot_id: &str, generation: u64);

    /// Called when a connection error occurs.
    async fn on_error(&self, bot_id: &str, error: &str);
}

/// Boxed connection handler.
pub type BoxedConnectionHandler = Arc<dyn ConnectionHandler>;

/// Information about a connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address (if available).
    pub remote_addr: Option<String>,
    /// Connection protocol (ws, http, etc.).
    pub protocol: String,
    /// Additional metadata, e.g. request headers.
    pub metadata: HashMap<String, String>,
}

impl ConnectionInfo {
    /// Creates new connection info.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            remote_addr: None,
            protocol: protocol.into(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the remote address.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Adds metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Channel-backed [`Transport`] used by the socket implementations.
///
/// Frames are queued into the connection's send loop; closing publishes a
/// close code the send loop observes.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Bot this connection belongs to.
    pub id: String,
    message_tx: mpsc::Sender<Vec<u8>>,
    close_tx: Arc<watch::Sender<Option<u16>>>,
}

impl ConnectionHandle {
    /// Creates a new connection handle.
    pub fn new(
        id: impl Into<String>,
        message_tx: mpsc::Sender<Vec<u8>>,
        close_tx: watch::Sender<Option<u16>>,
    ) -> Self {
        Self {
            id: id.into(),
            message_tx,
            close_tx: Arc::new(close_tx),
        }
    }

    /// Creates a handle together with the receiving ends a send loop needs.
    pub fn channel(
        id: impl Into<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Vec<u8>>, watch::Receiver<Option<u16>>) {
        let (message_tx, message_rx) = mpsc::channel(buffer);
        let (close_tx, close_rx) = watch::channel(None);
        (Self::new(id, message_tx, close_tx), message_rx, close_rx)
    }

    /// Returns `true` once a close has been requested.
    pub fn is_closed(&self) -> bool {
        self.close_tx.borrow().is_some() || self.message_tx.is_closed()
    }
}

#[async_trait]
impl Transport for ConnectionHandle {
    async fn send(&self, data: Vec<u8>) -> TransportResult<()> {
        if self.close_tx.borrow().is_some() {
            return Err(TransportError::closed("close requested"));
        }
        self.message_tx
            .send(data)
            .await
            .map_err(|_| TransportError::closed(format!("send loop for '{}' ended", self.id)))
    }

    async fn close(&self, code: u16) {
        let _ = self.close_tx.send(Some(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_forwards_frames() {
        let (handle, mut rx, _close) = ConnectionHandle::channel("bot", 4);
        handle.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn closed_handle_rejects_sends() {
        let (handle, _rx, close_rx) = ConnectionHandle::channel("bot", 4);
        handle.close(CLOSE_GOING_AWAY).await;

        assert_eq!(*close_rx.borrow(), Some(CLOSE_GOING_AWAY));
        assert!(handle.is_closed());
        let err = handle.send(b"late".to_vec()).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn dropped_loop_reports_closed() {
        let (handle, rx, _close) = ConnectionHandle::channel("bot", 4);
        drop(rx);
        assert!(handle.send(b"x".to_vec()).await.is_err());
    }
}
