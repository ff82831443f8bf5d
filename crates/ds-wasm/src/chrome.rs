//! Engines backed by the `chrome.*` extension APIs.
//!
//! APIs are resolved through `Reflect` at call time and invoked in their
//! promise form, so every engine call completes exactly once and reports
//! failures through `Result`.

use js_sys::{Array, Function, Promise, Reflect, JSON};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use ds_core::error::{EngineError, StoreError};
use ds_core::ruleset::RulesetEngine;
use ds_core::script::{ScriptDefinition, ScriptEngine};
use ds_core::settings::SettingsStore;
use ds_core::types::RulesetUpdate;

/// Resolve `chrome.<path...>`.
pub fn api(path: &[&str]) -> Result<JsValue, JsValue> {
    let mut target = Reflect::get(&js_sys::global(), &"chrome".into())?;
    for segment in path {
        if target.is_undefined() || target.is_null() {
            break;
        }
        target = Reflect::get(&target, &JsValue::from_str(segment))?;
    }
    if target.is_undefined() || target.is_null() {
        return Err(JsValue::from_str(&format!("chrome.{} is not available", path.join("."))));
    }
    Ok(target)
}

/// Call `chrome.<namespace>.<method>(args...)` and await its promise.
async fn call(namespace: &[&str], method: &str, args: &[JsValue]) -> Result<JsValue, String> {
    let target = api(namespace).map_err(js_message)?;
    let function: Function = Reflect::get(&target, &JsValue::from_str(method))
        .map_err(js_message)?
        .dyn_into()
        .map_err(|_| format!("{} is not a function", method))?;

    let argv = Array::new();
    for arg in args {
        argv.push(arg);
    }
    let returned = Reflect::apply(&function, &target, &argv).map_err(js_message)?;
    let promise: Promise = returned
        .dyn_into()
        .map_err(|_| format!("{} did not return a promise", method))?;
    JsFuture::from(promise).await.map_err(js_message)
}

/// Message of a thrown value or rejected promise.
pub fn js_message(value: JsValue) -> String {
    if let Some(message) = Reflect::get(&value, &"message".into())
        .ok()
        .and_then(|m| m.as_string())
    {
        return message;
    }
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

pub fn to_js<T: Serialize>(value: &T) -> Result<JsValue, String> {
    let json = serde_json::to_string(value).map_err(|e| e.to_string())?;
    JSON::parse(&json).map_err(js_message)
}

pub fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T, String> {
    let json: String = JSON::stringify(value)
        .map_err(js_message)?
        .into();
    serde_json::from_str(&json).map_err(|e| e.to_string())
}

fn engine_error(message: String) -> EngineError {
    if message.contains("Duplicate script ID") {
        // Chrome: "Duplicate script ID '<id>'"
        let id = message.split('\'').nth(1).unwrap_or_default().to_string();
        EngineError::DuplicateScript(id)
    } else if message.contains("Nonexistent script ID") {
        // Chrome: "Nonexistent script ID '<id>'"
        let id = message.split('\'').nth(1).unwrap_or_default().to_string();
        EngineError::NonexistentScript(id)
    } else if message.contains("ruleset") && message.contains("nvalid") {
        EngineError::UnknownRuleset(message)
    } else if message.contains("Invalid") || message.contains("Error at parameter") {
        EngineError::InvalidDefinition(message)
    } else {
        EngineError::Unavailable(message)
    }
}

// =============================================================================
// chrome.storage
// =============================================================================

/// One `chrome.storage` area.
pub struct ChromeSettingsStore {
    area: String,
}

impl ChromeSettingsStore {
    pub fn new(area: &str) -> Self {
        Self { area: area.to_string() }
    }
}

impl SettingsStore for ChromeSettingsStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        let keys = to_js(&keys).map_err(StoreError::Malformed)?;
        let values = call(&["storage", self.area.as_str()], "get", &[keys])
            .await
            .map_err(StoreError::Unavailable)?;
        from_js(&values).map_err(StoreError::Malformed)
    }

    async fn set(&self, values: Map<String, Value>) -> Result<(), StoreError> {
        let values = to_js(&values).map_err(StoreError::Malformed)?;
        call(&["storage", self.area.as_str()], "set", &[values])
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(())
    }
}

// =============================================================================
// chrome.declarativeNetRequest
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRulesetOptions {
    enable_ruleset_ids: Vec<String>,
    disable_ruleset_ids: Vec<String>,
}

/// Static rulesets declared in the manifest.
pub struct ChromeRulesets;

impl RulesetEngine for ChromeRulesets {
    async fn update_enabled_rulesets(&self, update: RulesetUpdate) -> Result<(), EngineError> {
        let options = to_js(&UpdateRulesetOptions {
            enable_ruleset_ids: update.enable.to_strings(),
            disable_ruleset_ids: update.disable.to_strings(),
        })
        .map_err(EngineError::InvalidDefinition)?;
        call(&["declarativeNetRequest"], "updateEnabledRulesets", &[options])
            .await
            .map_err(engine_error)?;
        Ok(())
    }
}

// =============================================================================
// chrome.scripting
// =============================================================================

#[derive(Serialize)]
struct ScriptIds<'a> {
    ids: &'a [String],
}

/// Dynamic content-script registrations.
pub struct ChromeScripting;

impl ScriptEngine for ChromeScripting {
    async fn get_registered(&self, ids: &[String]) -> Result<Vec<ScriptDefinition>, EngineError> {
        let filter = to_js(&ScriptIds { ids }).map_err(EngineError::InvalidDefinition)?;
        let scripts = call(&["scripting"], "getRegisteredContentScripts", &[filter])
            .await
            .map_err(engine_error)?;
        from_js(&scripts).map_err(EngineError::Unavailable)
    }

    async fn register(&self, definition: ScriptDefinition) -> Result<(), EngineError> {
        let scripts = to_js(&[definition]).map_err(EngineError::InvalidDefinition)?;
        call(&["scripting"], "registerContentScripts", &[scripts])
            .await
            .map_err(engine_error)?;
        Ok(())
    }

    async fn unregister(&self, ids: &[String]) -> Result<(), EngineError> {
        let filter = to_js(&ScriptIds { ids }).map_err(EngineError::InvalidDefinition)?;
        call(&["scripting"], "unregisterContentScripts", &[filter])
            .await
            .map_err(engine_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_script_message_maps_to_duplicate() {
        let error = engine_error("Duplicate script ID 'data-saver-media-blocker'".to_string());
        assert_eq!(error, EngineError::DuplicateScript("data-saver-media-blocker".to_string()));
    }

    #[test]
    fn nonexistent_script_message_maps_to_nonexistent() {
        let error = engine_error("Nonexistent script ID 'data-saver-media-blocker'".to_string());
        assert_eq!(error, EngineError::NonexistentScript("data-saver-media-blocker".to_string()));
        assert!(!error.is_fatal());
    }

    #[test]
    fn invalid_ruleset_message_is_fatal() {
        let error = engine_error("Invalid ruleset id: trackers.".to_string());
        assert!(error.is_fatal());
    }

    #[test]
    fn other_messages_are_transient() {
        let error = engine_error("Extension context invalidated.".to_string());
        assert!(!error.is_fatal());
    }
}
