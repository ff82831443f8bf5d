//! In-memory engines.
//!
//! Stand-ins for the browser's storage, ruleset and scripting engines, used
//! by the tests and by the CLI simulator. Every call yields once before
//! touching state, so callers observe the same reentrancy windows they get
//! from the real asynchronous engines.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::{EngineError, StoreError};
use crate::ruleset::RulesetEngine;
use crate::script::{ScriptDefinition, ScriptEngine};
use crate::settings::{SettingsStore, StorageChange, StorageChanges};
use crate::types::{RulesetSet, RulesetUpdate};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Settings Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    values: Map<String, Value>,
    unavailable: bool,
    listeners: Vec<mpsc::UnboundedSender<(String, StorageChanges)>>,
}

/// Key-value store for one storage area, with change notification.
#[derive(Clone)]
pub struct MemorySettingsStore {
    area: String,
    state: Arc<Mutex<StoreState>>,
}

impl MemorySettingsStore {
    pub fn new(area: &str) -> Self {
        Self {
            area: area.to_string(),
            state: Arc::default(),
        }
    }

    /// Seed values without notifying listeners.
    pub fn with_values(self, values: Map<String, Value>) -> Self {
        lock(&self.state).values = values;
        self
    }

    pub fn values(&self) -> Map<String, Value> {
        lock(&self.state).values.clone()
    }

    /// Make every subsequent call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    /// Receive `(area, changes)` for every mutation that changed a value.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<(String, StorageChanges)> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).listeners.push(tx);
        rx
    }
}

impl SettingsStore for MemorySettingsStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        tokio::task::yield_now().await;
        let state = lock(&self.state);
        if state.unavailable {
            return Err(StoreError::Unavailable(self.area.clone()));
        }
        Ok(keys
            .iter()
            .filter_map(|key| state.values.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, values: Map<String, Value>) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        if state.unavailable {
            return Err(StoreError::Unavailable(self.area.clone()));
        }

        let mut changes = StorageChanges::default();
        for (key, new_value) in values {
            let old_value = state.values.insert(key.clone(), new_value.clone());
            if old_value.as_ref() != Some(&new_value) {
                changes.0.insert(
                    key,
                    StorageChange {
                        old_value,
                        new_value: Some(new_value),
                    },
                );
            }
        }

        if !changes.0.is_empty() {
            state
                .listeners
                .retain(|tx| tx.send((self.area.clone(), changes.clone())).is_ok());
        }
        Ok(())
    }
}

// =============================================================================
// Ruleset Engine
// =============================================================================

struct RulesetState {
    enabled: RulesetSet,
    requests: Vec<RulesetUpdate>,
    fail_next: Option<EngineError>,
}

/// Ruleset engine over the fixed universe.
#[derive(Clone)]
pub struct MemoryRulesetEngine {
    state: Arc<Mutex<RulesetState>>,
}

impl Default for MemoryRulesetEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRulesetEngine {
    /// Every ruleset enabled, as declared by the manifest.
    pub fn new() -> Self {
        Self::with_enabled(RulesetSet::UNIVERSE)
    }

    pub fn with_enabled(enabled: RulesetSet) -> Self {
        Self {
            state: Arc::new(Mutex::new(RulesetState {
                enabled,
                requests: Vec::new(),
                fail_next: None,
            })),
        }
    }

    /// Reject the next request with `error`.
    pub fn fail_next(&self, error: EngineError) {
        lock(&self.state).fail_next = Some(error);
    }

    /// Applied requests, oldest first.
    pub fn requests(&self) -> Vec<RulesetUpdate> {
        lock(&self.state).requests.clone()
    }

    pub fn enabled(&self) -> RulesetSet {
        lock(&self.state).enabled
    }
}

impl RulesetEngine for MemoryRulesetEngine {
    async fn update_enabled_rulesets(&self, update: RulesetUpdate) -> Result<(), EngineError> {
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if !(update.enable & update.disable).is_empty() {
            return Err(EngineError::InvalidDefinition(format!(
                "rulesets both enabled and disabled: {}",
                update.enable & update.disable
            )));
        }
        state.enabled = (state.enabled | update.enable) - update.disable;
        state.requests.push(update);
        Ok(())
    }
}

// =============================================================================
// Script Engine
// =============================================================================

#[derive(Default)]
struct ScriptState {
    registered: Vec<ScriptDefinition>,
    register_calls: usize,
    fail_next: Option<EngineError>,
}

/// Script-injection engine keyed by registration id.
#[derive(Clone, Default)]
pub struct MemoryScriptEngine {
    state: Arc<Mutex<ScriptState>>,
}

impl MemoryScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next register/unregister call with `error`.
    pub fn fail_next(&self, error: EngineError) {
        lock(&self.state).fail_next = Some(error);
    }

    pub fn registered(&self) -> Vec<ScriptDefinition> {
        lock(&self.state).registered.clone()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        lock(&self.state).registered.iter().any(|d| d.id == id)
    }

    /// Successful registrations so far.
    pub fn register_calls(&self) -> usize {
        lock(&self.state).register_calls
    }
}

impl ScriptEngine for MemoryScriptEngine {
    async fn get_registered(&self, ids: &[String]) -> Result<Vec<ScriptDefinition>, EngineError> {
        tokio::task::yield_now().await;
        Ok(lock(&self.state)
            .registered
            .iter()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn register(&self, definition: ScriptDefinition) -> Result<(), EngineError> {
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if definition.js.is_empty() {
            return Err(EngineError::InvalidDefinition(format!(
                "script '{}' has no files",
                definition.id
            )));
        }
        if state.registered.iter().any(|d| d.id == definition.id) {
            return Err(EngineError::DuplicateScript(definition.id));
        }
        state.registered.push(definition);
        state.register_calls += 1;
        Ok(())
    }

    async fn unregister(&self, ids: &[String]) -> Result<(), EngineError> {
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if let Some(missing) = ids.iter().find(|id| !state.registered.iter().any(|d| &d.id == *id)) {
            return Err(EngineError::NonexistentScript(missing.clone()));
        }
        state.registered.retain(|d| !ids.contains(&d.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_notifies_only_changed_keys() {
        let store = MemorySettingsStore::new("sync");
        let mut rx = store.subscribe();

        let mut values = Map::new();
        values.insert("media".into(), json!(false));
        store.set(values.clone()).await.unwrap();
        store.set(values).await.unwrap();

        let (area, changes) = rx.try_recv().unwrap();
        assert_eq!(area, "sync");
        assert_eq!(changes.media_change(), Some(false));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn store_omits_missing_keys() {
        let store = MemorySettingsStore::new("sync");
        let values = store.get(&["ads", "media"]).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn unregister_unknown_id_is_rejected() {
        let engine = MemoryScriptEngine::new();
        let result = engine.unregister(&["missing".to_string()]).await;
        assert_eq!(result, Err(EngineError::NonexistentScript("missing".to_string())));
    }

    #[tokio::test]
    async fn conflicting_update_is_rejected() {
        let engine = MemoryRulesetEngine::new();
        let update = RulesetUpdate {
            enable: RulesetSet::ADS,
            disable: RulesetSet::ADS,
        };
        assert!(engine.update_enabled_rulesets(update).await.is_err());
        assert_eq!(engine.enabled(), RulesetSet::UNIVERSE);
    }
}
