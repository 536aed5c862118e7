//! # gscore Transport
//!
//! WebSocket implementations of the transport seam defined in `gscore-core`.
//!
//! ## Features
//!
//! - `ws-server` (default): the axum-based server adapters connect to
//! - `ws-client` (default): a reconnecting tokio-tungstenite client
//! - `full`: both
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  gscore-runtime     │  (ConnectionHandler impl)
//! ├─────────────────────┤
//! │  gscore-core        │  (Transport / ConnectionHandler traits)
//! ├─────────────────────┤
//! │  gscore-transport   │  <- This crate (sockets)
//! ├─────────────────────┤
//! │  Network (TCP)      │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gscore_transport::{WsServer, WsServerConfig};
//!
//! let listener = WsServer::new(WsServerConfig::new("0.0.0.0", 8765), handler)
//!     .listen()
//!     .await?;
//! ```
//!
//! ```rust,ignore
//! use gscore_transport::{WsClient, WsClientConfig};
//!
//! let client = WsClient::new(WsClientConfig::new("ws://127.0.0.1:8765/ws/console"), "console", handler);
//! let sender = client.sender();
//! tokio::spawn(client.run(shutdown.clone()));
//! ```

#[cfg(feature = "ws-client")]
pub mod client;

#[cfg(feature = "ws-server")]
pub mod server;

#[cfg(feature = "ws-client")]
pub use client::{WsClient, WsClientConfig};

#[cfg(feature = "ws-server")]
pub use server::{ListenerHandle, WsServer, WsServerConfig};
