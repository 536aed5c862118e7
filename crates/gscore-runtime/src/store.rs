//! JSON file backed plugin settings.
//!
//! All plugin records live in one pretty-printed JSON object keyed by plugin
//! name. Every save rewrites the file through a temporary sibling and a
//! rename, so readers never observe a half-written file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gscore_framework::{ConfigStore, PluginConfig, StoreError};
use parking_lot::RwLock;
use tracing::{debug, info};

/// [`ConfigStore`] persisted to a JSON file.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    plugins: RwLock<BTreeMap<String, PluginConfig>>,
}

impl JsonConfigStore {
    /// Opens the store at `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let plugins = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::new(format!("read {}: {e}", path.display())))?;
            let plugins: BTreeMap<String, PluginConfig> = serde_json::from_str(&data)
                .map_err(|e| StoreError::new(format!("parse {}: {e}", path.display())))?;
            info!(path = %path.display(), plugins = plugins.len(), "Loaded plugin settings");
            plugins
        } else {
            debug!(path = %path.display(), "No plugin settings file yet");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            plugins: RwLock::new(plugins),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, plugins: &BTreeMap<String, PluginConfig>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::new(format!("create {}: {e}", parent.display())))?;
        }
        let data = serde_json::to_string_pretty(plugins)
            .map_err(|e| StoreError::new(format!("encode settings: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .map_err(|e| StoreError::new(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::new(format!("replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self, plugin: &str) -> Option<PluginConfig> {
        self.plugins.read().get(plugin).cloned()
    }

    fn save(&self, config: &PluginConfig) -> Result<(), StoreError> {
        let mut plugins = self.plugins.write();
        plugins.insert(config.name.clone(), config.clone());
        self.write_file(&plugins)?;
        debug!(plugin = %config.name, path = %self.path.display(), "Plugin settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gscore_core::Scope;
    use gscore_framework::{PluginOptions, SvOptions, SvPatch, SvRegistry};

    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::open(dir.path().join("plugins.json")).unwrap();
        assert!(store.load("anything").is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plugins.json");

        {
            let store = Arc::new(JsonConfigStore::open(&path).unwrap());
            let registry = SvRegistry::new(store);
            let plugin = registry
                .plugin("genshin", PluginOptions::new().prefix("gs"))
                .unwrap();
            let sv = registry.sv("query", &plugin, SvOptions::new()).unwrap();
            sv.set(SvPatch {
                area: Some(Scope::Direct),
                ..Default::default()
            })
            .unwrap();
        }
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let store = JsonConfigStore::open(&path).unwrap();
        let saved = store.load("genshin").unwrap();
        assert_eq!(saved.prefix, "gs");
        assert_eq!(saved.sv["query"].area, Scope::Direct);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonConfigStore::open(&path).is_err());
    }
}
