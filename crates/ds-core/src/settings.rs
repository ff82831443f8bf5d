//! Persisted user settings.
//!
//! Settings live in an external key-value store. Every read goes through
//! [`Settings::from_stored`], which resolves a missing or malformed key to
//! `true`, so the rest of the crate only ever sees three booleans.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::types::{RulesetId, RulesetSet};

/// Value used for any key the store does not hold.
pub const DEFAULT_FLAG: bool = true;

/// The three user-facing toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
    pub ads: bool,
    pub images: bool,
    pub media: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ads: DEFAULT_FLAG,
            images: DEFAULT_FLAG,
            media: DEFAULT_FLAG,
        }
    }
}

impl Settings {
    /// Keys read and written by every surface.
    pub const KEYS: [&'static str; 3] = ["ads", "images", "media"];

    /// Resolve a raw store snapshot into settings.
    pub fn from_stored(values: &Map<String, Value>) -> Self {
        Self {
            ads: resolve_flag(values, "ads"),
            images: resolve_flag(values, "images"),
            media: resolve_flag(values, "media"),
        }
    }

    /// Encode all three keys for a single multi-key write.
    pub fn to_stored(&self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("ads".to_string(), Value::Bool(self.ads));
        values.insert("images".to_string(), Value::Bool(self.images));
        values.insert("media".to_string(), Value::Bool(self.media));
        values
    }

    pub fn flag(&self, id: RulesetId) -> bool {
        match id {
            RulesetId::Ads => self.ads,
            RulesetId::Images => self.images,
            RulesetId::Media => self.media,
        }
    }

    /// Rulesets that should be enabled for these settings.
    pub fn enabled_rulesets(&self) -> RulesetSet {
        RulesetId::ALL
            .into_iter()
            .filter(|id| self.flag(*id))
            .collect()
    }
}

fn resolve_flag(values: &Map<String, Value>, key: &str) -> bool {
    resolve_value(key, values.get(key))
}

fn resolve_value(key: &str, value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => DEFAULT_FLAG,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => {
            log::warn!("Setting '{}' holds non-boolean value {}, using default", key, other);
            DEFAULT_FLAG
        }
    }
}

// =============================================================================
// Change Notifications
// =============================================================================

/// Old and new value of one key, as delivered by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Key → change map for one store mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageChanges(pub HashMap<String, StorageChange>);

impl StorageChanges {
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::Malformed(e.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Resolved new `media` flag, if this mutation touched it.
    ///
    /// A removed key resolves to the default like any other read.
    pub fn media_change(&self) -> Option<bool> {
        self.0
            .get("media")
            .map(|change| resolve_value("media", change.new_value.as_ref()))
    }

    pub fn with(mut self, key: &str, old_value: Option<bool>, new_value: Option<bool>) -> Self {
        self.0.insert(
            key.to_string(),
            StorageChange {
                old_value: old_value.map(Value::Bool),
                new_value: new_value.map(Value::Bool),
            },
        );
        self
    }
}

// =============================================================================
// Store Interface
// =============================================================================

/// Asynchronous, eventually consistent key-value store.
#[allow(async_fn_in_trait)]
pub trait SettingsStore {
    /// Raw values for `keys`; keys the store does not hold are omitted.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError>;

    /// Write every entry of `values` in one atomic mutation.
    async fn set(&self, values: Map<String, Value>) -> Result<(), StoreError>;
}

/// Read the current settings, defaults applied.
pub async fn read_settings<S: SettingsStore>(store: &S) -> Result<Settings, StoreError> {
    let values = store.get(&Settings::KEYS).await?;
    Ok(Settings::from_stored(&values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_empty_store_reads_all_enabled() {
        let settings = Settings::from_stored(&Map::new());
        assert_eq!(
            settings,
            Settings {
                ads: true,
                images: true,
                media: true
            }
        );
    }

    #[test]
    fn test_partial_store_fills_defaults() {
        let settings = Settings::from_stored(&map(json!({"ads": false})));
        assert!(!settings.ads);
        assert!(settings.images);
        assert!(settings.media);
    }

    #[test]
    fn test_non_boolean_value_fails_open() {
        let settings = Settings::from_stored(&map(json!({"images": "no", "media": null})));
        assert!(settings.images);
        assert!(settings.media);
    }

    #[test]
    fn test_enabled_rulesets_follow_flags() {
        let settings = Settings {
            ads: false,
            images: true,
            media: false,
        };
        assert_eq!(settings.enabled_rulesets(), RulesetSet::IMAGES);
        assert_eq!(Settings::default().enabled_rulesets(), RulesetSet::UNIVERSE);
    }

    #[test]
    fn test_to_stored_writes_every_key() {
        let stored = Settings::default().to_stored();
        for key in Settings::KEYS {
            assert_eq!(stored.get(key), Some(&Value::Bool(true)));
        }
    }

    #[test]
    fn test_changes_parse_browser_shape() {
        let changes = StorageChanges::from_json(
            r#"{"media": {"oldValue": true, "newValue": false}, "ads": {"newValue": true}}"#,
        )
        .unwrap();
        assert_eq!(changes.media_change(), Some(false));
        assert!(changes.contains("ads"));
    }

    #[test]
    fn test_removed_media_key_resolves_to_default() {
        let changes = StorageChanges::default().with("media", Some(false), None);
        assert_eq!(changes.media_change(), Some(true));
        assert_eq!(StorageChanges::default().media_change(), None);
    }
}
