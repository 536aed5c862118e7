//! Service modules: the unit triggers are registered on.
//!
//! A [`ServiceModule`] ("SV") belongs to exactly one [`Plugin`] and carries
//! its own priority, permission level, scope and allow/deny lists. Triggers
//! are added through a small builder:
//!
//! ```rust,ignore
//! let plugin = registry.plugin("genshin", PluginOptions::new().prefix("gs"))?;
//! let sv = registry.sv("query", &plugin, SvOptions::new().priority(3))?;
//!
//! sv.on_command("uid").block(true).handler(query_uid)?;
//! sv.on_keyword(["抽卡", "gacha"]).handler(gacha)?;
//! sv.on_regex(r"^(?P<game>gs|sr)(\d+)$").prefix(false).handler(route)?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gscore_core::{Event, Scope};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{SvConfig, lists_admit};
use crate::error::{RegistryResult, StoreError};
use crate::handler::{Handler, into_handler};
use crate::plugin::Plugin;
use crate::trigger::{Trigger, TriggerType};

// ============================================================================
// Options / Patch
// ============================================================================

/// Defaults used when a module has no persisted settings.
#[derive(Debug, Clone, Default)]
pub struct SvOptions {
    config: SvConfig,
}

impl SvOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn pm(mut self, pm: u8) -> Self {
        self.config.pm = pm;
        self
    }

    pub fn area(mut self, area: Scope) -> Self {
        self.config.area = area;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn black_list<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.black_list = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn white_list<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.white_list = ids.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn into_config(self) -> SvConfig {
        self.config
    }
}

/// A partial settings update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct SvPatch {
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub pm: Option<u8>,
    pub area: Option<Scope>,
    pub black_list: Option<BTreeSet<String>>,
    pub white_list: Option<BTreeSet<String>>,
}

// ============================================================================
// Service Module
// ============================================================================

/// A registered service module.
///
/// Holds an owning reference to its [`Plugin`]; plugins never point back at
/// their modules (the registry tracks that side), so no cycle exists.
pub struct ServiceModule {
    name: String,
    index: usize,
    plugin: Arc<Plugin>,
    settings: RwLock<SvConfig>,
    triggers: RwLock<BTreeMap<TriggerType, Vec<Arc<Trigger>>>>,
}

impl ServiceModule {
    pub(crate) fn new(name: &str, index: usize, plugin: Arc<Plugin>, settings: SvConfig) -> Self {
        Self {
            name: name.to_string(),
            index,
            plugin,
            settings: RwLock::new(settings),
            triggers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration order among all modules.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> SvConfig {
        self.settings.read().clone()
    }

    pub fn priority(&self) -> i32 {
        self.settings.read().priority
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    /// Returns `true` if this module may handle the event.
    ///
    /// Both the module and its plugin must be enabled, the conversation must
    /// be in scope, the sender's permission level must satisfy both, and
    /// neither allow/deny list may exclude the conversation.
    pub fn admits(&self, event: &Event) -> bool {
        let sv = self.settings.read();
        if !sv.enabled {
            return false;
        }
        self.plugin.with_settings(|plugin| {
            plugin.enabled
                && plugin.area.resolve(sv.area).admits(event.scope())
                && event.user_pm <= sv.pm
                && event.user_pm <= plugin.pm
                && lists_admit(&sv.black_list, &sv.white_list, event)
                && lists_admit(&plugin.black_list, &plugin.white_list, event)
        })
    }

    /// Triggers in evaluation order: by type precedence, then registration.
    pub fn triggers(&self) -> Vec<Arc<Trigger>> {
        self.triggers.read().values().flatten().cloned().collect()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.read().values().map(Vec::len).sum()
    }

    /// Looks up a trigger by type and effective key.
    pub fn trigger(&self, kind: TriggerType, key: &str) -> Option<Arc<Trigger>> {
        self.triggers
            .read()
            .get(&kind)?
            .iter()
            .find(|t| t.key() == key)
            .cloned()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Starts registering a trigger of `kind` for one or more keys.
    pub fn on(&self, kind: TriggerType, keys: impl IntoKeys) -> TriggerBuilder<'_> {
        TriggerBuilder {
            sv: self,
            kind,
            keys: keys.into_keys(),
            block: false,
            to_me: false,
            prefix: !matches!(kind, TriggerType::File | TriggerType::Message),
        }
    }

    pub fn on_fullmatch(&self, keys: impl IntoKeys) -> TriggerBuilder<'_> {
        self.on(TriggerType::Fullmatch, keys)
    }

    pub fn on_command(&self, keys: impl IntoKeys) -> TriggerBuilder<'_> {
        self.on(TriggerType::Command, keys)
    }

    pub fn on_prefix(&self, keys: impl IntoKeys) -> TriggerBuilder<'_> {
        self.on(TriggerType::Prefix, keys)
    }

    pub fn on_keyword(&self, keys: impl IntoKeys) -> TriggerBuilder<'_> {
        self.on(TriggerType::Keyword, keys)
    }

    pub fn on_suffix(&self, keys: impl IntoKeys) -> TriggerBuilder<'_> {
        self.on(TriggerType::Suffix, keys)
    }

    pub fn on_regex(&self, keys: impl IntoKeys) -> TriggerBuilder<'_> {
        self.on(TriggerType::Regex, keys)
    }

    /// Matches attachments by extension, e.g. `"json"`.
    pub fn on_file(&self, extensions: impl IntoKeys) -> TriggerBuilder<'_> {
        self.on(TriggerType::File, extensions)
    }

    /// Matches every message. The key is a generated id.
    pub fn on_message(&self) -> TriggerBuilder<'_> {
        self.on(TriggerType::Message, Uuid::new_v4().to_string())
    }

    fn register(
        &self,
        kind: TriggerType,
        keys: Vec<String>,
        block: bool,
        to_me: bool,
        apply_prefix: bool,
        handler: crate::handler::BoxedHandler,
    ) -> RegistryResult<Vec<String>> {
        let prefix = if apply_prefix {
            self.plugin.prefix()
        } else {
            String::new()
        };

        let built = keys
            .into_iter()
            .map(|key| {
                Trigger::new(kind, format!("{prefix}{key}"), handler.clone(), block, to_me)
            })
            .collect::<RegistryResult<Vec<_>>>()?;

        let mut table = self.triggers.write();
        let slot = table.entry(kind).or_default();
        let mut effective = Vec::with_capacity(built.len());
        for trigger in built {
            let key = trigger.key().to_string();
            if slot.iter().any(|t| t.key() == key) {
                debug!(sv = %self.name, trigger = %kind, key = %key, "Trigger already registered, keeping the first");
            } else {
                debug!(sv = %self.name, trigger = %kind, key = %key, block, to_me, "Trigger registered");
                slot.push(Arc::new(trigger));
            }
            effective.push(key);
        }
        Ok(effective)
    }

    // ------------------------------------------------------------------
    // Runtime settings
    // ------------------------------------------------------------------

    /// Applies a partial update and persists it under the plugin's entry.
    pub fn set(&self, patch: SvPatch) -> Result<(), StoreError> {
        self.plugin.update_sv(&self.name, || {
            let mut s = self.settings.write();
            if let Some(priority) = patch.priority {
                s.priority = priority;
            }
            if let Some(enabled) = patch.enabled {
                s.enabled = enabled;
            }
            if let Some(pm) = patch.pm {
                s.pm = pm;
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
            s.clone()
        })?;
        info!(plugin = %self.plugin.name(), sv = %self.name, "Service module settings updated");
        Ok(())
    }

    pub fn enable(&self) -> Result<(), StoreError> {
        self.set(SvPatch {
            enabled: Some(true),
            ..Default::default()
        })
    }

    pub fn disable(&self) -> Result<(), StoreError> {
        self.set(SvPatch {
            enabled: Some(false),
            ..Default::default()
        })
    }
}

impl std::fmt::Debug for ServiceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceModule")
            .field("name", &self.name)
            .field("plugin", &self.plugin.name())
            .field("index", &self.index)
            .field("triggers", &self.trigger_count())
            .finish()
    }
}

// ============================================================================
// Trigger Builder
// ============================================================================

/// Builder returned by [`ServiceModule::on`] and its shorthands.
#[must_use = "triggers are only registered once `.handler(..)` is called"]
pub struct TriggerBuilder<'a> {
    sv: &'a ServiceModule,
    kind: TriggerType,
    keys: Vec<String>,
    block: bool,
    to_me: bool,
    prefix: bool,
}

impl TriggerBuilder<'_> {
    /// Stop evaluating further triggers once this one matches.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Only match messages that mention the bot.
    pub fn to_me(mut self, to_me: bool) -> Self {
        self.to_me = to_me;
        self
    }

    /// Whether the plugin prefix is prepended to each key.
    pub fn prefix(mut self, apply: bool) -> Self {
        self.prefix = apply;
        self
    }

    /// Registers `handler` for every key, returning the effective keys.
    ///
    /// Keys already registered for this type are left untouched.
    pub fn handler<H: Handler>(self, handler: H) -> RegistryResult<Vec<String>> {
        self.sv.register(
            self.kind,
            self.keys,
            self.block,
            self.to_me,
            self.prefix,
            into_handler(handler),
        )
    }
}

/// One or more trigger keys.
pub trait IntoKeys {
    fn into_keys(self) -> Vec<String>;
}

impl IntoKeys for &str {
    fn into_keys(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoKeys for String {
    fn into_keys(self) -> Vec<String> {
        vec![self]
    }
}

impl<S: Into<String>> IntoKeys for Vec<S> {
    fn into_keys(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<S: Into<String>, const N: usize> IntoKeys for [S; N] {
    fn into_keys(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::bot::Bot;
    use crate::bot::tests::test_bot;
    use crate::config::{ConfigStore, MemoryConfigStore, PluginArea};
    use crate::handler::HandlerResult;
    use crate::plugin::PluginOptions;

    fn plugin(prefix: &str) -> Arc<Plugin> {
        Arc::new(Plugin::new(
            0,
            PluginOptions::new().prefix(prefix).into_config("p"),
            Arc::new(MemoryConfigStore::new()),
        ))
    }

    async fn noop(_bot: Bot, _event: Event) -> HandlerResult {
        Ok(())
    }

    fn sv(plugin: Arc<Plugin>) -> ServiceModule {
        ServiceModule::new("sv", 0, plugin, SvConfig::default())
    }

    fn counting(counter: &Arc<AtomicUsize>, by: usize) -> impl Handler {
        let counter = counter.clone();
        move |_bot: Bot, _event: Event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(by, Ordering::SeqCst);
                HandlerResult::Ok(())
            }
        }
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_first_handler() {
        let sv = sv(plugin(""));
        let hits = Arc::new(AtomicUsize::new(0));

        sv.on_prefix("abc").handler(counting(&hits, 1)).unwrap();
        sv.on_prefix("abc").handler(counting(&hits, 100)).unwrap();
        assert_eq!(sv.trigger_count(), 1);

        let trigger = sv.trigger(TriggerType::Prefix, "abc").unwrap();
        trigger
            .handler()
            .call(test_bot(), Event::default())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prefix_is_applied_to_keys() {
        let sv = sv(plugin("gs"));

        let keys = sv.on_fullmatch(["帮助", "help"]).handler(noop).unwrap();
        assert_eq!(keys, vec!["gs帮助", "gshelp"]);

        let keys = sv.on_fullmatch("raw").prefix(false).handler(noop).unwrap();
        assert_eq!(keys, vec!["raw"]);

        let keys = sv.on_file("json").handler(noop).unwrap();
        assert_eq!(keys, vec!["json"]);
    }

    #[test]
    fn invalid_regex_registers_nothing() {
        let sv = sv(plugin(""));
        assert!(sv.on_regex(vec!["ok", "("]).handler(noop).is_err());
        assert_eq!(sv.trigger_count(), 0);
    }

    #[test]
    fn triggers_follow_type_precedence() {
        let sv = sv(plugin(""));
        sv.on_message().handler(noop).unwrap();
        sv.on_prefix("b").handler(noop).unwrap();
        sv.on_prefix("a").handler(noop).unwrap();
        sv.on_fullmatch("c").handler(noop).unwrap();

        let order: Vec<_> = sv
            .triggers()
            .iter()
            .map(|t| (t.kind(), t.key().to_string()))
            .collect();
        assert_eq!(order[0], (TriggerType::Fullmatch, "c".to_string()));
        assert_eq!(order[1], (TriggerType::Prefix, "b".to_string()));
        assert_eq!(order[2], (TriggerType::Prefix, "a".to_string()));
        assert_eq!(order[3].0, TriggerType::Message);
    }

    #[test]
    fn admission_rules() {
        let plugin = plugin("");
        let sv = ServiceModule::new(
            "sv",
            0,
            plugin.clone(),
            SvOptions::new().area(Scope::Direct).pm(2).into_config(),
        );
        let mut event = Event {
            user_type: gscore_core::UserType::Direct,
            user_id: "u".into(),
            user_pm: 1,
            ..Default::default()
        };
        assert!(sv.admits(&event));

        event.user_pm = 3;
        assert!(!sv.admits(&event));
        event.user_pm = 1;

        event.user_type = gscore_core::UserType::Group;
        event.group_id = Some("g".into());
        assert!(!sv.admits(&event));

        plugin
            .set(crate::plugin::PluginPatch {
                area: Some(PluginArea::All),
                ..Default::default()
            })
            .unwrap();
        assert!(sv.admits(&event));

        plugin.disable().unwrap();
        assert!(!sv.admits(&event));
    }

    #[test]
    fn set_persists_under_plugin() {
        let store = Arc::new(MemoryConfigStore::new());
        let plugin = Arc::new(Plugin::new(
            0,
            PluginOptions::new().into_config("p"),
            store.clone(),
        ));
        let sv = ServiceModule::new("query", 0, plugin, SvConfig::default());

        sv.disable().unwrap();
        assert!(!sv.is_enabled());
        assert!(!store.load("p").unwrap().sv["query"].enabled);
    }

    #[test]
    fn concurrent_sets_store_the_final_settings() {
        let store = Arc::new(MemoryConfigStore::new());
        let plugin = Arc::new(Plugin::new(
            0,
            PluginOptions::new().into_config("p"),
            store.clone(),
        ));
        let sv = Arc::new(ServiceModule::new("query", 0, plugin, SvConfig::default()));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let sv = sv.clone();
                std::thread::spawn(move || {
                    for step in 0..50 {
                        sv.set(SvPatch {
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

        assert_eq!(store.load("p").unwrap().sv["query"].priority, sv.priority());
    }
}
