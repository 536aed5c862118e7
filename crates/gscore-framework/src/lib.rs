//! # gscore Framework
//!
//! Plugin registry, trigger matching and dispatch.
//!
//! - [`SvRegistry`] interns [`Plugin`]s and [`ServiceModule`]s by name and
//!   overlays persisted settings from a [`ConfigStore`].
//! - [`ServiceModule::on`] and its shorthands register [`Trigger`]s.
//! - [`Dispatcher`] matches an [`Event`](gscore_core::Event) against every
//!   admitted module and spawns the matching handlers.
//! - [`SessionGuard`] tracks in-flight invocations per conversation and hosts
//!   reply waiters.
//!
//! # Example
//!
//! ```rust,ignore
//! use gscore_framework::prelude::*;
//!
//! let registry = Arc::new(SvRegistry::in_memory());
//! let plugin = registry.plugin("echo", PluginOptions::new())?;
//! let sv = registry.sv("echo", &plugin, SvOptions::new())?;
//!
//! sv.on_prefix("echo").block(true).handler(|bot: Bot, event: Event| async move {
//!     bot.send(event.text).await?;
//!     Ok(())
//! })?;
//!
//! let dispatcher = Dispatcher::new(registry, outbound);
//! dispatcher.dispatch(event);
//! ```

pub mod bot;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod plugin;
pub mod registry;
pub mod service;
pub mod session;
pub mod trigger;

pub use bot::{Bot, BoxedOutbound, IntoSegments, Outbound};
pub use config::{ConfigStore, MemoryConfigStore, PluginArea, PluginConfig, SvConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher, FiredTrigger};
pub use error::{HandlerError, RegistryError, RegistryResult, SessionError, StoreError};
pub use handler::{BoxedHandler, Handler, HandlerResult, into_handler};
pub use plugin::{Plugin, PluginOptions, PluginPatch};
pub use registry::SvRegistry;
pub use service::{IntoKeys, ServiceModule, SvOptions, SvPatch, TriggerBuilder};
pub use session::{PendingReply, SessionGuard, SessionPermit};
pub use trigger::{Trigger, TriggerMatch, TriggerType};

/// Commonly used types.
pub mod prelude {
    pub use std::sync::Arc;

    pub use gscore_core::{Event, MessageReceive, MessageSend, Scope, Segment, UserType};

    pub use crate::{
        Bot, Dispatcher, HandlerResult, Plugin, PluginArea, PluginOptions, ServiceModule,
        SvOptions, SvRegistry, TriggerType,
    };
}
