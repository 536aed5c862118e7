//! gscore Runtime - orchestration layer for the gscore bot middleware.
//!
//! This crate provides:
//! - The [`GsCore`] runtime tying the registry, dispatcher and server together
//! - The [`ConnectionManager`], the live table of connected bots
//! - Layered configuration ([`config`]) and logging setup ([`logging`])
//! - A JSON file backed plugin settings store ([`JsonConfigStore`])
//!
//! ```rust,ignore
//! use gscore_runtime::GsCore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let core = GsCore::builder().build()?;
//!     let plugin = core.registry().plugin("echo", Default::default())?;
//!     let sv = core.registry().sv("echo", &plugin, Default::default())?;
//!     sv.on_prefix("echo").handler(echo)?;
//!
//!     // Serves `ws://127.0.0.1:8765/ws/{bot_id}` until Ctrl+C
//!     core.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Connections
//!
//! Adapters connect as clients. A second connection with the same bot id
//! takes over the table entry; the first socket is left open until its peer
//! drops it. Replies are sent back through the connection the triggering
//! frame arrived on.

pub mod config;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod manager;
pub mod runtime;
pub mod store;

// Re-exports
pub use config::{
    ClientConfig, ConfigError, ConfigLoader, ConfigResult, GsCoreConfig, LoggingConfig,
    ServerConfig, StoreConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use hooks::{ConnectHook, LifecycleHook};
pub use logging::LoggingBuilder;
pub use manager::{BroadcastReport, ConnectedBot, ConnectionManager};
pub use runtime::{GsCore, GsCoreBuilder, wait_for_shutdown};
pub use store::JsonConfigStore;

// Re-export tracing for use by plugins
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
