//! WebAssembly bindings for the Data Saver extension
//!
//! Three entry points, one per execution context:
//!
//! - `start_background`: the service worker's lifecycle coordinator
//! - `start_video_suppressor`: the injected per-frame script
//! - `popup_load` / `popup_save`: the settings popup

mod chrome;
mod dom;
mod logger;

use js_sys::Promise;
use log::LevelFilter;
use tokio::sync::mpsc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use ds_core::{
    LifecycleCoordinator, LifecycleEvent, PopupSession, SaverConfig, Settings, StorageChanges,
    VideoSuppressor,
};

use crate::chrome::{api, from_js, to_js, ChromeRulesets, ChromeScripting, ChromeSettingsStore};

fn load_config(config_json: Option<String>) -> Result<SaverConfig, JsValue> {
    match config_json {
        Some(json) => SaverConfig::from_json(&json)
            .map_err(|e| JsValue::from_str(&format!("Failed to load config: {}", e))),
        None => Ok(SaverConfig::default()),
    }
}

fn add_listener(path: &[&str], listener: &JsValue) -> Result<(), JsValue> {
    let event = api(path)?;
    let add: js_sys::Function = js_sys::Reflect::get(&event, &"addListener".into())?.dyn_into()?;
    add.call1(&event, listener)?;
    Ok(())
}

/// Start the background coordinator.
///
/// Must run synchronously during service-worker start so the listeners are
/// attached before the browser dispatches the event that woke the worker.
#[wasm_bindgen]
pub fn start_background(config_json: Option<String>) -> Result<(), JsValue> {
    logger::init(LevelFilter::Info);
    let config = load_config(config_json)?;

    let (tx, rx) = mpsc::unbounded_channel::<LifecycleEvent>();

    let installed_tx = tx.clone();
    let on_installed = Closure::<dyn FnMut(JsValue)>::new(move |_details: JsValue| {
        let _ = installed_tx.send(LifecycleEvent::Installed);
    });
    add_listener(&["runtime", "onInstalled"], on_installed.as_ref())?;
    on_installed.forget();

    let startup_tx = tx.clone();
    let on_startup = Closure::<dyn FnMut()>::new(move || {
        let _ = startup_tx.send(LifecycleEvent::Startup);
    });
    add_listener(&["runtime", "onStartup"], on_startup.as_ref())?;
    on_startup.forget();

    let on_changed = Closure::<dyn FnMut(JsValue, JsValue)>::new(move |changes: JsValue, area: JsValue| {
        let area = area.as_string().unwrap_or_default();
        match from_js::<StorageChanges>(&changes) {
            Ok(changes) => {
                let _ = tx.send(LifecycleEvent::SettingsChanged { area, changes });
            }
            Err(e) => log::warn!("Ignoring malformed storage change: {}", e),
        }
    });
    add_listener(&["storage", "onChanged"], on_changed.as_ref())?;
    on_changed.forget();

    let store = ChromeSettingsStore::new(&config.settings_area);
    let coordinator = LifecycleCoordinator::new(config, store, ChromeRulesets, ChromeScripting);
    spawn_local(async move {
        coordinator.start(rx).await;
    });
    Ok(())
}

/// Start suppressing videos in the current frame.
#[wasm_bindgen]
pub fn start_video_suppressor(config_json: Option<String>) -> Result<(), JsValue> {
    logger::init(LevelFilter::Warn);
    let config = load_config(config_json)?;
    let document = web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| JsValue::from_str("No document in this context"))?;
    dom::run(document, VideoSuppressor::from_config(&config))
}

fn popup_session(config: &SaverConfig) -> PopupSession<ChromeSettingsStore, ChromeRulesets> {
    PopupSession::new(ChromeSettingsStore::new(&config.settings_area), ChromeRulesets)
}

/// Resolve to `{ads, images, media}` with defaults applied.
#[wasm_bindgen]
pub fn popup_load(config_json: Option<String>) -> Result<Promise, JsValue> {
    let config = load_config(config_json)?;
    Ok(future_to_promise(async move {
        let settings = popup_session(&config)
            .load()
            .await
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        to_js(&settings).map_err(|e| JsValue::from_str(&e))
    }))
}

/// Persist the toggles, then apply the ruleset split.
#[wasm_bindgen]
pub fn popup_save(ads: bool, images: bool, media: bool, config_json: Option<String>) -> Result<Promise, JsValue> {
    let config = load_config(config_json)?;
    let settings = Settings { ads, images, media };
    Ok(future_to_promise(async move {
        popup_session(&config)
            .save(settings)
            .await
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(JsValue::UNDEFINED)
    }))
}
