//! # gscore
//!
//! WebSocket middleware between chat platform adapters and plugin handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌─────────────────┐     ┌────────────┐     ┌─────────────────────┐
//! │  Adapter  │────▶│ ConnectionMgr   │────▶│ Dispatcher │────▶│ SV "query" (prio 5) │──▶ handler
//! │ (ws conn) │◀────│ (one per bot)   │     │            │────▶│ SV "admin" (prio 0) │──▶ handler
//! └───────────┘     └─────────────────┘     └────────────┘     └─────────────────────┘
//! ```
//!
//! - **Adapters**: platform bridges connecting to `/ws/{bot_id}`
//! - **Plugins**: named groups of SVs sharing a command prefix and permissions
//! - **SVs**: service modules holding triggers, with priority, scope and
//!   blacklist/whitelist settings persisted per plugin
//! - **Triggers**: fullmatch, prefix, suffix, keyword, command, regex, file
//!   and message matchers bound to async handlers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gscore::prelude::*;
//!
//! async fn echo(bot: Bot, event: Event) -> HandlerResult {
//!     bot.send(event.text).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let core = GsCore::builder().build()?;
//!     let plugin = core.registry().plugin("echo", PluginOptions::new())?;
//!     let sv = core.registry().sv("echo", &plugin, SvOptions::new())?;
//!     sv.on_prefix("echo").handler(echo)?;
//!
//!     core.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default), `yaml-config`: configuration file formats
//! - `ws-server` (default): the adapter-facing WebSocket server
//! - `ws-client` (default): the reconnecting WebSocket client
//! - `json-log`: JSON log output

pub use gscore_core as core;
pub use gscore_framework as framework;
pub use gscore_runtime as runtime;
pub use gscore_transport as transport;

/// Commonly used types for writing plugins and hosts.
///
/// ```rust,ignore
/// use gscore::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use gscore_runtime::{GsCore, GsCoreConfig};

    // Registration
    pub use gscore_framework::{
        Plugin, PluginArea, PluginOptions, ServiceModule, SvOptions, SvRegistry, TriggerType,
    };

    // Handlers
    pub use gscore_framework::{Bot, HandlerResult};

    // Wire model
    pub use gscore_core::{Event, MessageReceive, MessageSend, Scope, Segment, UserType};

    pub use gscore_runtime::prelude::*;
}
