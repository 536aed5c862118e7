//! The plugin and service-module registry.
//!
//! Names are interned: the first call for a name creates the instance, later
//! calls return the same `Arc` and ignore their options. Settings persisted
//! in the [`ConfigStore`] take precedence over the options passed at
//! creation, and options are written back when nothing was persisted yet.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, MemoryConfigStore};
use crate::error::{RegistryError, RegistryResult};
use crate::plugin::{Plugin, PluginOptions};
use crate::service::{ServiceModule, SvOptions};

#[derive(Default)]
struct RegistryInner {
    plugins: HashMap<String, Arc<Plugin>>,
    plugin_order: Vec<Arc<Plugin>>,
    svs: HashMap<String, Arc<ServiceModule>>,
    sv_order: Vec<Arc<ServiceModule>>,
    plugin_svs: HashMap<String, Vec<Arc<ServiceModule>>>,
}

/// Registry of all plugins and service modules.
pub struct SvRegistry {
    store: Arc<dyn ConfigStore>,
    inner: RwLock<RegistryInner>,
}

impl SvRegistry {
    /// Creates a registry backed by `store`.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Creates a registry whose settings are not persisted.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryConfigStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Returns the plugin called `name`, creating it on first use.
    pub fn plugin(&self, name: &str, options: PluginOptions) -> RegistryResult<Arc<Plugin>> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName { kind: "plugin" });
        }

        let mut inner = self.inner.write();
        if let Some(existing) = inner.plugins.get(name) {
            return Ok(existing.clone());
        }

        let settings = match self.store.load(name) {
            Some(mut stored) => {
                stored.name = name.to_string();
                stored
            }
            None => {
                let settings = options.into_config(name);
                self.store.save(&settings)?;
                settings
            }
        };

        let plugin = Arc::new(Plugin::new(
            inner.plugin_order.len(),
            settings,
            self.store.clone(),
        ));
        inner.plugins.insert(name.to_string(), plugin.clone());
        inner.plugin_order.push(plugin.clone());
        inner.plugin_svs.entry(name.to_string()).or_default();
        info!(plugin = %name, "Plugin registered");
        Ok(plugin)
    }

    /// Returns the service module called `name`, creating it under `plugin`
    /// on first use.
    pub fn sv(
        &self,
        name: &str,
        plugin: &Arc<Plugin>,
        options: SvOptions,
    ) -> RegistryResult<Arc<ServiceModule>> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName { kind: "sv" });
        }

        let mut inner = self.inner.write();
        if let Some(existing) = inner.svs.get(name) {
            if existing.plugin().name() != plugin.name() {
                warn!(
                    sv = %name,
                    owner = %existing.plugin().name(),
                    requested = %plugin.name(),
                    "Service module already belongs to another plugin"
                );
            }
            return Ok(existing.clone());
        }

        let settings = match plugin.stored_sv(name) {
            Some(stored) => stored,
            None => {
                let settings = options.into_config();
                plugin.save_sv(name, &settings)?;
                settings
            }
        };

        let sv = Arc::new(ServiceModule::new(
            name,
            inner.sv_order.len(),
            plugin.clone(),
            settings,
        ));
        inner.svs.insert(name.to_string(), sv.clone());
        inner.sv_order.push(sv.clone());
        inner
            .plugin_svs
            .entry(plugin.name().to_string())
            .or_default()
            .push(sv.clone());
        debug!(plugin = %plugin.name(), sv = %name, "Service module registered");
        Ok(sv)
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        self.inner.read().plugins.get(name).cloned()
    }

    pub fn get_sv(&self, name: &str) -> Option<Arc<ServiceModule>> {
        self.inner.read().svs.get(name).cloned()
    }

    /// Modules of a plugin, in registration order.
    pub fn svs_of(&self, plugin: &str) -> Vec<Arc<ServiceModule>> {
        self.inner
            .read()
            .plugin_svs
            .get(plugin)
            .cloned()
            .unwrap_or_default()
    }

    /// All plugins, in registration order.
    pub fn plugins(&self) -> Vec<Arc<Plugin>> {
        self.inner.read().plugin_order.clone()
    }

    /// All service modules, in registration order.
    pub fn services(&self) -> Vec<Arc<ServiceModule>> {
        self.inner.read().sv_order.clone()
    }
}

impl Default for SvRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for SvRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SvRegistry")
            .field("plugins", &inner.plugin_order.len())
            .field("svs", &inner.sv_order.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use gscore_core::Scope;

    use super::*;
    use crate::config::{PluginConfig, SvConfig};

    #[test]
    fn names_are_interned() {
        let registry = SvRegistry::in_memory();
        let a = registry
            .plugin("genshin", PluginOptions::new().priority(1))
            .unwrap();
        let b = registry
            .plugin("genshin", PluginOptions::new().priority(9))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.priority(), 1);

        let sv1 = registry.sv("query", &a, SvOptions::new()).unwrap();
        let sv2 = registry
            .sv("query", &a, SvOptions::new().priority(0))
            .unwrap();
        assert!(Arc::ptr_eq(&sv1, &sv2));
        assert_eq!(registry.services().len(), 1);
    }

    #[test]
    fn empty_names_are_rejected() {
        let registry = SvRegistry::in_memory();
        assert!(matches!(
            registry.plugin("", PluginOptions::new()),
            Err(RegistryError::InvalidName { kind: "plugin" })
        ));
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        assert!(matches!(
            registry.sv("", &plugin, SvOptions::new()),
            Err(RegistryError::InvalidName { kind: "sv" })
        ));
    }

    #[test]
    fn persisted_settings_overlay_options() {
        let mut stored = PluginConfig {
            name: "genshin".into(),
            prefix: "ys".into(),
            ..Default::default()
        };
        stored.sv.insert(
            "query".into(),
            SvConfig {
                area: Scope::Direct,
                ..Default::default()
            },
        );
        let store = Arc::new(MemoryConfigStore::with_records([stored]));
        let registry = SvRegistry::new(store);

        let plugin = registry
            .plugin("genshin", PluginOptions::new().prefix("gs"))
            .unwrap();
        assert_eq!(plugin.prefix(), "ys");

        let sv = registry
            .sv("query", &plugin, SvOptions::new().area(Scope::Group))
            .unwrap();
        assert_eq!(sv.config().area, Scope::Direct);
    }

    #[test]
    fn first_use_writes_defaults() {
        let store = Arc::new(MemoryConfigStore::new());
        let registry = SvRegistry::new(store.clone());
        let plugin = registry
            .plugin("p", PluginOptions::new().prefix("x"))
            .unwrap();
        registry
            .sv("a", &plugin, SvOptions::new().priority(2))
            .unwrap();

        let saved = store.load("p").unwrap();
        assert_eq!(saved.prefix, "x");
        assert_eq!(saved.sv["a"].priority, 2);
    }

    #[test]
    fn plugin_to_svs_in_order() {
        let registry = SvRegistry::in_memory();
        let p = registry.plugin("p", PluginOptions::new()).unwrap();
        let q = registry.plugin("q", PluginOptions::new()).unwrap();
        registry.sv("b", &p, SvOptions::new()).unwrap();
        registry.sv("x", &q, SvOptions::new()).unwrap();
        registry.sv("a", &p, SvOptions::new()).unwrap();

        let names: Vec<_> = registry
            .svs_of("p")
            .iter()
            .map(|sv| sv.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(registry.get_sv("x").unwrap().plugin().name(), "q");
        assert_eq!(registry.plugins().len(), 2);
    }
}
