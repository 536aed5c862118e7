//! Plugins: named groups of service modules sharing settings and a prefix.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::{ConfigStore, PluginArea, PluginConfig, SvConfig};
use crate::error::StoreError;

/// Defaults used when a plugin has no persisted settings.
#[derive(Debug, Clone)]
pub struct PluginOptions {
    pub pm: u8,
    pub priority: i32,
    pub enabled: bool,
    pub area: PluginArea,
    pub black_list: BTreeSet<String>,
    pub white_list: BTreeSet<String>,
    pub prefix: String,
}

impl Default for PluginOptions {
    fn default() -> Self {
        let base = PluginConfig::default();
        Self {
            pm: base.pm,
            priority: base.priority,
            enabled: base.enabled,
            area: base.area,
            black_list: base.black_list,
            white_list: base.white_list,
            prefix: base.prefix,
        }
    }
}

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn pm(mut self, pm: u8) -> Self {
        self.pm = pm;
        self
    }

    pub fn area(mut self, area: PluginArea) -> Self {
        self.area = area;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub(crate) fn into_config(self, name: &str) -> PluginConfig {
        PluginConfig {
            name: name.to_string(),
            pm: self.pm,
            priority: self.priority,
            enabled: self.enabled,
            area: self.area,
            black_list: self.black_list,
            white_list: self.white_list,
            prefix: self.prefix,
            sv: Default::default(),
        }
    }
}

/// A partial settings update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct PluginPatch {
    pub pm: Option<u8>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub area: Option<PluginArea>,
    pub black_list: Option<BTreeSet<String>>,
    pub white_list: Option<BTreeSet<String>>,
    pub prefix: Option<String>,
}

/// A registered plugin.
///
/// Obtained from [`SvRegistry::plugin`](crate::SvRegistry::plugin); one
/// instance exists per name.
pub struct Plugin {
    name: String,
    index: usize,
    settings: RwLock<PluginConfig>,
    store: Arc<dyn ConfigStore>,
    /// Held from mutation through save so saves reach the store in order.
    persist: Mutex<()>,
}

impl Plugin {
    pub(crate) fn new(index: usize, settings: PluginConfig, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            name: settings.name.clone(),
            index,
            settings: RwLock::new(settings),
            store,
            persist: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration order among plugins.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> PluginConfig {
        self.settings.read().clone()
    }

    pub fn prefix(&self) -> String {
        self.settings.read().prefix.clone()
    }

    pub fn priority(&self) -> i32 {
        self.settings.read().priority
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    /// Applies a partial update and persists it.
    pub fn set(&self, patch: PluginPatch) -> Result<(), StoreError> {
        let _persist = self.persist.lock();
        let snapshot = {
            let mut s = self.settings.write();
            if let Some(pm) = patch.pm {
                s.pm = pm;
            }
            if let Some(priority) = patch.priority {
                s.priority = priority;
            }
            if let Some(enabled) = patch.enabled {
                s.enabled = enabled;
            }
            if let Some(area) = patch.area {
                s.area = area;
            }
            if let Some(list) = patch.black_list {
                s.black_list = list;
            }
            if let Some(list) = patch.white_list {
                s.white_list = list;
            }
            if let Some(prefix) = patch.prefix {
                s.prefix = prefix;
            }
            s.clone()
        };
        info!(plugin = %self.name, "Plugin settings updated");
        self.store.save(&snapshot)
    }

    pub fn enable(&self) -> Result<(), StoreError> {
        self.set(PluginPatch {
            enabled: Some(true),
            ..Default::default()
        })
    }

    pub fn disable(&self) -> Result<(), StoreError> {
        self.set(PluginPatch {
            enabled: Some(false),
            ..Default::default()
        })
    }

    /// Runs `f` against the live settings without cloning them.
    pub(crate) fn with_settings<R>(&self, f: impl FnOnce(&PluginConfig) -> R) -> R {
        f(&self.settings.read())
    }

    /// Persisted settings of one of this plugin's modules.
    pub(crate) fn stored_sv(&self, sv: &str) -> Option<SvConfig> {
        self.settings.read().sv.get(sv).cloned()
    }

    /// Records a module's settings in this plugin's entry and persists it.
    pub(crate) fn save_sv(&self, sv: &str, config: &SvConfig) -> Result<(), StoreError> {
        self.update_sv(sv, || config.clone())
    }

    /// Runs `update` and persists the settings it returns, serialized with
    /// every other save of this plugin.
    pub(crate) fn update_sv<F>(&self, sv: &str, update: F) -> Result<(), StoreError>
    where
        F: FnOnce() -> SvConfig,
    {
        let _persist = self.persist.lock();
        let config = update();
        let snapshot = {
            let mut s = self.settings.write();
            s.sv.insert(sv.to_string(), config);
            s.clone()
        };
        self.store.save(&snapshot)
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("settings", &*self.settings.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;

    #[test]
    fn set_persists_patch() {
        let store = Arc::new(MemoryConfigStore::new());
        let plugin = Plugin::new(
            0,
            PluginOptions::new().prefix("gs").into_config("genshin"),
            store.clone(),
        );

        plugin
            .set(PluginPatch {
                priority: Some(1),
                prefix: Some("ys".into()),
                ..Default::default()
            })
            .unwrap();
        plugin.disable().unwrap();

        assert_eq!(plugin.prefix(), "ys");
        assert!(!plugin.is_enabled());
        let saved = store.load("genshin").unwrap();
        assert_eq!(saved.priority, 1);
        assert!(!saved.enabled);
    }

    #[test]
    fn sv_settings_live_under_plugin() {
        let store = Arc::new(MemoryConfigStore::new());
        let plugin = Plugin::new(0, PluginOptions::new().into_config("p"), store.clone());
        let sv = SvConfig {
            priority: 9,
            ..Default::default()
        };
        plugin.save_sv("query", &sv).unwrap();

        assert_eq!(plugin.stored_sv("query"), Some(sv.clone()));
        assert_eq!(store.load("p").unwrap().sv["query"], sv);
    }

    #[test]
    fn concurrent_sets_leave_latest_settings_stored() {
        let store = Arc::new(MemoryConfigStore::new());
        let plugin = Arc::new(Plugin::new(
            0,
            PluginOptions::new().into_config("p"),
            store.clone(),
        ));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let plugin = plugin.clone();
                std::thread::spawn(move || {
                    for step in 0..50 {
                        plugin
                            .set(PluginPatch {
                                priority: Some(worker * 100 + step),
                                ..Default::default()
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(store.load("p").unwrap().priority, plugin.priority());
    }
}
