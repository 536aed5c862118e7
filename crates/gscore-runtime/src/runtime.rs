//! Core orchestration: registry, dispatcher, connection table and server.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use gscore_runtime::GsCore;
//!
//! let core = GsCore::builder().profile("production").build()?;
//!
//! let plugin = core.registry().plugin("genshin", PluginOptions::new().prefix("gs"))?;
//! let sv = core.registry().sv("query", &plugin, SvOptions::new())?;
//! sv.on_command("uid").handler(query_uid)?;
//!
//! core.on_core_start(|| async { warm_caches().await });
//! core.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use gscore_core::{
    BoxedConnectionHandler, BoxedTransport, CLOSE_GOING_AWAY, ConnectionHandler, ConnectionInfo,
};
use gscore_framework::{ConfigStore, Dispatcher, MemoryConfigStore, SvRegistry};
use parking_lot::RwLock;
use tokio::signal;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ConfigLoader, GsCoreConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::hooks::{self, LifecycleHook};
use crate::logging;
use crate::manager::ConnectionManager;
use crate::store::JsonConfigStore;

/// The gscore runtime.
pub struct GsCore {
    config: GsCoreConfig,
    registry: Arc<SvRegistry>,
    manager: Arc<ConnectionManager>,
    dispatcher: Dispatcher,
    start_hooks: RwLock<Vec<LifecycleHook>>,
    shutdown_hooks: RwLock<Vec<LifecycleHook>>,
    running: AtomicBool,
}

impl GsCore {
    pub fn builder() -> GsCoreBuilder {
        GsCoreBuilder::new()
    }

    /// Creates a core from configuration, opening the settings store it names.
    pub fn from_config(config: GsCoreConfig) -> RuntimeResult<Self> {
        let store: Arc<dyn ConfigStore> = if config.store.persist {
            Arc::new(JsonConfigStore::open(config.store.resolve_path())?)
        } else {
            Arc::new(MemoryConfigStore::new())
        };
        Ok(Self::with_store(config, store))
    }

    /// Creates a core backed by an explicit settings store.
    pub fn with_store(config: GsCoreConfig, store: Arc<dyn ConfigStore>) -> Self {
        let registry = Arc::new(SvRegistry::new(store));
        let manager = Arc::new(ConnectionManager::new());
        let dispatcher = Dispatcher::new(registry.clone(), manager.clone());

        Self {
            config,
            registry,
            manager,
            dispatcher,
            start_hooks: RwLock::new(Vec::new()),
            shutdown_hooks: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GsCoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SvRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Registers a hook run when the core starts.
    pub fn on_core_start<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_hooks.write().push(hooks::lifecycle_hook(hook));
    }

    /// Registers a hook run on graceful shutdown.
    pub fn on_core_shutdown<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.shutdown_hooks.write().push(hooks::lifecycle_hook(hook));
    }

    /// Registers a hook run each time a bot connects.
    pub fn on_bot_connect<F, Fut>(&self, hook: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.manager.on_connect(hook);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// The handler socket servers report connections to.
    pub fn connection_handler(&self) -> BoxedConnectionHandler {
        Arc::new(CoreHandler {
            manager: self.manager.clone(),
            dispatcher: self.dispatcher.clone(),
        })
    }

    /// Marks the core running and runs the start hooks.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }

        info!(
            plugins = self.registry.plugins().len(),
            svs = self.registry.services().len(),
            "Starting gscore"
        );
        let start: Vec<_> = self.start_hooks.read().iter().map(|h| h()).collect();
        let failures = hooks::run_all("core_start", start).await;
        if failures > 0 {
            warn!(failures, "Some start hooks failed");
        }
        Ok(())
    }

    /// Closes every connection and runs the shutdown hooks.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Runtime is not running");
            return;
        }

        info!("Stopping gscore");
        self.manager.close_all(CLOSE_GOING_AWAY).await;
        let shutdown: Vec<_> = self.shutdown_hooks.read().iter().map(|h| h()).collect();
        hooks::run_all("core_shutdown", shutdown).await;
        info!("gscore stopped");
    }

    /// Starts the WebSocket server on the configured address.
    #[cfg(feature = "ws-server")]
    pub async fn serve(&self) -> RuntimeResult<gscore_transport::ListenerHandle> {
        let server = gscore_transport::WsServer::new(
            self.config.server.to_transport_config(),
            self.connection_handler(),
        );
        Ok(server.listen().await?)
    }

    /// Runs until Ctrl+C or SIGTERM.
    #[cfg(feature = "ws-server")]
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes.
    #[cfg(feature = "ws-server")]
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        let listener = match self.serve().await {
            Ok(listener) => listener,
            Err(e) => {
                self.stop().await;
                return Err(e);
            }
        };
        info!(addr = %listener.local_addr(), "gscore is running");

        shutdown.await;

        listener.shutdown().await;
        self.stop().await;
        Ok(())
    }
}

impl std::fmt::Debug for GsCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsCore")
            .field("registry", &self.registry)
            .field("manager", &self.manager)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                if let Err(e) = signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    }
}

// =============================================================================
// Connection Handler
// =============================================================================

/// Bridges socket events to the connection table and the dispatcher.
struct CoreHandler {
    manager: Arc<ConnectionManager>,
    dispatcher: Dispatcher,
}

#[async_trait]
impl ConnectionHandler for CoreHandler {
    async fn on_connect(
        &self,
        bot_id: &str,
        info: ConnectionInfo,
        transport: BoxedTransport,
    ) -> u64 {
        self.manager.connect(bot_id, info, transport).await
    }

    async fn on_message(&self, bot_id: &str, data: &[u8]) {
        match self.dispatcher.dispatch_frame(bot_id, data) {
            Ok(outcome) => trace!(
                bot_id = %bot_id,
                fired = outcome.fired.len(),
                consumed = outcome.consumed,
                "Frame dispatched"
            ),
            Err(e) => warn!(bot_id = %bot_id, error = %e, "Dropping undecodable frame"),
        }
    }

    async fn on_disconnect(&self, bot_id: &str, generation: u64) {
        self.manager.disconnect_if_current(bot_id, generation).await;
    }

    async fn on_error(&self, bot_id: &str, error: &str) {
        warn!(bot_id = %bot_id, error = %error, "Connection error");
    }
}

// =============================================================================
// Builder
// =============================================================================

type ConfigOverride = Box<dyn FnOnce(&mut GsCoreConfig) + Send>;

/// Builds a [`GsCore`] from layered configuration.
pub struct GsCoreBuilder {
    loader: ConfigLoader,
    overrides: Vec<ConfigOverride>,
    store: Option<Arc<dyn ConfigStore>>,
    init_logging: bool,
}

impl GsCoreBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new().with_current_dir(),
            overrides: Vec::new(),
            store: None,
            init_logging: true,
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.loader = self.loader.profile(profile.into());
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.loader = self.loader.without_env();
        self
    }

    /// Merges configuration above every file and environment source.
    pub fn merge(mut self, config: GsCoreConfig) -> Self {
        self.loader = self.loader.merge(config);
        self
    }

    /// Edits the loaded configuration before it is validated again.
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut GsCoreConfig) + Send + 'static,
    {
        self.overrides.push(Box::new(f));
        self
    }

    /// Uses `store` instead of the configured settings file.
    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Leaves the global subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn build(self) -> RuntimeResult<GsCore> {
        let mut config = self.loader.load()?;
        if !self.overrides.is_empty() {
            for f in self.overrides {
                f(&mut config);
            }
            validate_config(&config)?;
        }
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }
        debug!(
            host = %config.server.host,
            port = config.server.port,
            "Runtime configuration loaded"
        );

        match self.store {
            Some(store) => Ok(GsCore::with_store(config, store)),
            None => GsCore::from_config(config),
        }
    }
}

impl Default for GsCoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
