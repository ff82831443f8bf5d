use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};

use ds_core::memory::{MemoryRulesetEngine, MemoryScriptEngine, MemorySettingsStore};
use ds_core::{
    CoordinatorState, LifecycleCoordinator, LifecycleEvent, SaverConfig, ScriptEngine, SettingsStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimEvent {
    /// Extension installed
    Install,
    /// Browser restarted
    Startup,
    /// Popup turns media blocking on
    MediaOn,
    /// Popup turns media blocking off
    MediaOff,
}

pub struct SimOptions {
    pub settings: String,
    pub events: Vec<SimEvent>,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
struct SimResult {
    state: String,
    settings: Map<String, Value>,
    enabled_rulesets: Vec<String>,
    disabled_rulesets: Vec<String>,
    ruleset_requests: usize,
    script_registered: bool,
    last_error: Option<String>,
}

pub fn run(config: SaverConfig, opts: SimOptions) -> Result<(), String> {
    let values: Map<String, Value> = serde_json::from_str(&opts.settings)
        .map_err(|e| format!("Invalid settings JSON: {}", e))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    let result = runtime.block_on(run_async(config, values, opts))?;

    let json = serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

async fn run_async(
    config: SaverConfig,
    values: Map<String, Value>,
    opts: SimOptions,
) -> Result<SimResult, String> {
    let store = MemorySettingsStore::new(&config.settings_area).with_values(values);
    let rulesets = MemoryRulesetEngine::new();
    let scripts = MemoryScriptEngine::new();
    let script_id = config.script_id.clone();

    if opts.stale {
        scripts
            .register(config.script_definition())
            .await
            .map_err(|e| format!("Failed to seed stale registration: {}", e))?;
    }

    let mut notifications = store.subscribe();
    let coordinator = LifecycleCoordinator::new(config, store.clone(), rulesets.clone(), scripts.clone());

    for event in opts.events {
        match event {
            SimEvent::Install => coordinator.handle(LifecycleEvent::Installed).await,
            SimEvent::Startup => coordinator.handle(LifecycleEvent::Startup).await,
            SimEvent::MediaOn | SimEvent::MediaOff => {
                let mut change = Map::new();
                change.insert("media".to_string(), Value::Bool(event == SimEvent::MediaOn));
                store
                    .set(change)
                    .await
                    .map_err(|e| format!("Failed to write settings: {}", e))?;
            }
        }

        while let Ok((area, changes)) = notifications.try_recv() {
            coordinator
                .handle(LifecycleEvent::SettingsChanged { area, changes })
                .await;
        }
    }

    let enabled = rulesets.enabled();
    let state = match coordinator.state() {
        CoordinatorState::Uninitialized => "uninitialized",
        CoordinatorState::Converging => "converging",
        CoordinatorState::Converged => "converged",
    };

    Ok(SimResult {
        state: state.to_string(),
        settings: store.values(),
        enabled_rulesets: enabled.to_strings(),
        disabled_rulesets: enabled.complement_in_universe().to_strings(),
        ruleset_requests: rulesets.requests().len(),
        script_registered: scripts.is_registered(&script_id),
        last_error: coordinator.last_error().map(|e| e.to_string()),
    })
}
