//! Persisted plugin and service-module settings.
//!
//! Settings live in one [`PluginConfig`] record per plugin, with each of its
//! service modules stored under `sv`. The record is read through a
//! [`ConfigStore`] when a plugin or module is first created and written back
//! whenever settings change at runtime.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use gscore_core::{Event, Scope};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ============================================================================
// Settings Records
// ============================================================================

/// Scope of a plugin. `Sv` defers to each service module's own scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginArea {
    Group,
    Direct,
    All,
    #[default]
    Sv,
}

impl PluginArea {
    /// Resolves the scope that applies to one of the plugin's modules.
    pub fn resolve(self, sv_area: Scope) -> Scope {
        match self {
            PluginArea::Group => Scope::Group,
            PluginArea::Direct => Scope::Direct,
            PluginArea::All => Scope::All,
            PluginArea::Sv => sv_area,
        }
    }
}

/// Settings of one service module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvConfig {
    pub priority: i32,
    pub enabled: bool,
    /// Highest permission level (numerically) still allowed to trigger.
    pub pm: u8,
    pub area: Scope,
    pub black_list: BTreeSet<String>,
    pub white_list: BTreeSet<String>,
}

impl Default for SvConfig {
    fn default() -> Self {
        Self {
            priority: 5,
            enabled: true,
            pm: 6,
            area: Scope::All,
            black_list: BTreeSet::new(),
            white_list: BTreeSet::new(),
        }
    }
}

/// Settings of one plugin, including its service modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub name: String,
    pub pm: u8,
    pub priority: i32,
    pub enabled: bool,
    pub area: PluginArea,
    pub black_list: BTreeSet<String>,
    pub white_list: BTreeSet<String>,
    /// Prepended to trigger keys registered with prefix application on.
    pub prefix: String,
    pub sv: BTreeMap<String, SvConfig>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            pm: 6,
            priority: 5,
            enabled: true,
            area: PluginArea::Sv,
            black_list: BTreeSet::new(),
            white_list: BTreeSet::new(),
            prefix: String::new(),
            sv: BTreeMap::new(),
        }
    }
}

/// Applies allow/deny lists to an event's group and user ids.
pub(crate) fn lists_admit(
    black_list: &BTreeSet<String>,
    white_list: &BTreeSet<String>,
    event: &Event,
) -> bool {
    if event.conversation_ids().any(|id| black_list.contains(id)) {
        return false;
    }
    white_list.is_empty() || event.conversation_ids().any(|id| white_list.contains(id))
}

// ============================================================================
// Config Store
// ============================================================================

/// Storage for plugin settings.
pub trait ConfigStore: Send + Sync {
    /// Loads the record for `plugin`, if one was saved.
    fn load(&self, plugin: &str) -> Option<PluginConfig>;

    /// Saves a plugin record, replacing any previous one.
    fn save(&self, config: &PluginConfig) -> Result<(), StoreError>;
}

/// In-memory [`ConfigStore`], used by tests and when persistence is off.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    plugins: RwLock<HashMap<String, PluginConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with records.
    pub fn with_records(records: impl IntoIterator<Item = PluginConfig>) -> Self {
        let plugins = records.into_iter().map(|c| (c.name.clone(), c)).collect();
        Self {
            plugins: RwLock::new(plugins),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, plugin: &str) -> Option<PluginConfig> {
        self.plugins.read().get(plugin).cloned()
    }

    fn save(&self, config: &PluginConfig) -> Result<(), StoreError> {
        self.plugins
            .write()
            .insert(config.name.clone(), config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_area_resolution() {
        assert_eq!(PluginArea::Sv.resolve(Scope::Direct), Scope::Direct);
        assert_eq!(PluginArea::Group.resolve(Scope::Direct), Scope::Group);
    }

    #[test]
    fn partial_records_fill_defaults() {
        let config: PluginConfig =
            serde_json::from_str(r#"{"name":"genshin","sv":{"query":{"priority":1}}}"#).unwrap();
        assert_eq!(config.pm, 6);
        assert_eq!(config.area, PluginArea::Sv);
        let sv = &config.sv["query"];
        assert_eq!(sv.priority, 1);
        assert!(sv.enabled);
        assert_eq!(sv.area, Scope::All);
    }

    #[test]
    fn lists() {
        let event = Event {
            group_id: Some("g1".into()),
            user_id: "u1".into(),
            ..Default::default()
        };
        let none = BTreeSet::new();
        let g1: BTreeSet<String> = ["g1".to_string()].into();
        let other: BTreeSet<String> = ["g2".to_string()].into();

        assert!(lists_admit(&none, &none, &event));
        assert!(!lists_admit(&g1, &none, &event));
        assert!(lists_admit(&none, &g1, &event));
        assert!(!lists_admit(&none, &other, &event));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryConfigStore::new();
        assert!(store.load("p").is_none());
        let config = PluginConfig {
            name: "p".into(),
            prefix: "gs".into(),
            ..Default::default()
        };
        store.save(&config).unwrap();
        assert_eq!(store.load("p"), Some(config));
    }
}
