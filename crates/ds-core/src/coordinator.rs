//! Lifecycle coordinator.
//!
//! Drives the ruleset controller and the script registrar to match the
//! persisted settings after install, after startup, and whenever `media`
//! changes.
//!
//! Every convergence run holds one async lock, so callbacks that interleave
//! while an engine call is suspended are applied in arrival order. Within a
//! run, settings are read only after the ruleset request has completed.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::config::SaverConfig;
use crate::error::ConvergenceError;
use crate::ruleset::{RulesetController, RulesetEngine};
use crate::script::{ScriptEngine, ScriptRegistrar};
use crate::settings::{read_settings, SettingsStore, StorageChanges};

/// Convergence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No install or startup run has completed yet
    Uninitialized,
    /// A run is in flight
    Converging,
    /// Enforcement matches the last settings read
    Converged,
}

/// Event consumed by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// The extension was installed or updated
    Installed,
    /// The browser process started
    Startup,
    /// A storage area changed
    SettingsChanged { area: String, changes: StorageChanges },
}

#[derive(Debug, Default)]
struct Status {
    converged: bool,
    in_flight: usize,
    last_error: Option<ConvergenceError>,
}

/// Marks a run in flight until dropped.
struct RunGuard<'a> {
    status: &'a Mutex<Status>,
}

impl<'a> RunGuard<'a> {
    fn enter(status: &'a Mutex<Status>) -> Self {
        lock(status).in_flight += 1;
        Self { status }
    }

    fn finish(&self, result: &Result<(), ConvergenceError>, initializes: bool) {
        let mut status = lock(self.status);
        match result {
            Ok(()) => {
                if initializes {
                    status.converged = true;
                }
                status.last_error = None;
            }
            Err(e) => status.last_error = Some(e.clone()),
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock(self.status).in_flight -= 1;
    }
}

fn lock(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps rulesets and the script registration in step with the settings.
pub struct LifecycleCoordinator<S, R, E> {
    config: SaverConfig,
    store: S,
    rulesets: RulesetController<R>,
    registrar: ScriptRegistrar<E>,
    status: Mutex<Status>,
    convergence: tokio::sync::Mutex<()>,
}

impl<S, R, E> LifecycleCoordinator<S, R, E>
where
    S: SettingsStore,
    R: RulesetEngine,
    E: ScriptEngine,
{
    /// Build a coordinator; nothing runs until an event is delivered.
    pub fn new(config: SaverConfig, store: S, ruleset_engine: R, script_engine: E) -> Self {
        let registrar = ScriptRegistrar::new(script_engine, config.script_definition());
        Self {
            config,
            store,
            rulesets: RulesetController::new(ruleset_engine),
            registrar,
            status: Mutex::new(Status::default()),
            convergence: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SaverConfig {
        &self.config
    }

    pub fn state(&self) -> CoordinatorState {
        let status = lock(&self.status);
        if status.in_flight > 0 {
            CoordinatorState::Converging
        } else if status.converged {
            CoordinatorState::Converged
        } else {
            CoordinatorState::Uninitialized
        }
    }

    /// Failure of the most recent run, cleared by the next success.
    pub fn last_error(&self) -> Option<ConvergenceError> {
        lock(&self.status).last_error.clone()
    }

    /// Deliver events until the channel closes.
    pub async fn start(&self, mut events: mpsc::UnboundedReceiver<LifecycleEvent>) {
        log::info!("Lifecycle coordinator started");
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        log::info!("Lifecycle coordinator stopped");
    }

    /// Dispatch one event. Failures are logged; the next event retries.
    pub async fn handle(&self, event: LifecycleEvent) {
        let result = match event {
            LifecycleEvent::Installed => self.on_install().await,
            LifecycleEvent::Startup => self.on_startup().await,
            LifecycleEvent::SettingsChanged { area, changes } => {
                self.on_settings_changed(&area, &changes).await
            }
        };
        if let Err(e) = result {
            log::debug!("Event left enforcement in last-known state: {}", e);
        }
    }

    pub async fn on_install(&self) -> Result<(), ConvergenceError> {
        log::info!("Extension installed");
        self.converge(false).await
    }

    pub async fn on_startup(&self) -> Result<(), ConvergenceError> {
        log::info!("Browser started, re-deriving rules and scripts");
        self.converge(self.config.clear_stale_registration_on_startup).await
    }

    /// React to a store mutation.
    ///
    /// Only `media` is handled here: whoever writes `ads` or `images` applies
    /// the ruleset split in the same transaction.
    pub async fn on_settings_changed(
        &self,
        area: &str,
        changes: &StorageChanges,
    ) -> Result<(), ConvergenceError> {
        if area != self.config.settings_area {
            return Ok(());
        }
        let Some(media) = changes.media_change() else {
            return Ok(());
        };

        let _run = self.convergence.lock().await;
        let guard = RunGuard::enter(&self.status);
        log::info!("Media blocking toggled: {}", if media { "ON" } else { "OFF" });

        let result = self.registrar.set_active(media).await.map_err(ConvergenceError::from);
        self.report(&result);
        guard.finish(&result, false);
        result
    }

    async fn converge(&self, clear_stale: bool) -> Result<(), ConvergenceError> {
        let _run = self.convergence.lock().await;
        let guard = RunGuard::enter(&self.status);

        let result = self.rederive(clear_stale).await;
        self.report(&result);
        guard.finish(&result, true);
        result
    }

    async fn rederive(&self, clear_stale: bool) -> Result<(), ConvergenceError> {
        if clear_stale {
            // a failed cleanup is covered by the presence check on register
            if let Err(e) = self.registrar.clear_stale().await {
                log::warn!("Error clearing stale script registration: {}", e);
            }
        }

        self.rulesets.enable_all().await?;

        let settings = read_settings(&self.store).await?;
        self.rulesets.set_enabled(settings.enabled_rulesets()).await?;
        self.registrar.set_active(settings.media).await?;

        log::info!("Converged on {:?}", settings);
        Ok(())
    }

    fn report(&self, result: &Result<(), ConvergenceError>) {
        if let Err(e) = result {
            if e.is_transient() {
                log::warn!("Convergence failed, waiting for next event: {}", e);
            } else {
                log::warn!("Convergence failed on misconfiguration: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::memory::{MemoryRulesetEngine, MemoryScriptEngine, MemorySettingsStore};
    use crate::popup::PopupSession;
    use crate::ruleset::RulesetEngine;
    use crate::script::ScriptDefinition;
    use crate::settings::Settings;
    use crate::types::{RulesetSet, RulesetUpdate};
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    type Coordinator = LifecycleCoordinator<MemorySettingsStore, MemoryRulesetEngine, MemoryScriptEngine>;

    struct Harness {
        store: MemorySettingsStore,
        rulesets: MemoryRulesetEngine,
        scripts: MemoryScriptEngine,
        coordinator: Coordinator,
    }

    fn harness(values: Value) -> Harness {
        let values = match values {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let store = MemorySettingsStore::new("sync").with_values(values);
        let rulesets = MemoryRulesetEngine::new();
        let scripts = MemoryScriptEngine::new();
        let coordinator = LifecycleCoordinator::new(
            SaverConfig::default(),
            store.clone(),
            rulesets.clone(),
            scripts.clone(),
        );
        Harness {
            store,
            rulesets,
            scripts,
            coordinator,
        }
    }

    fn script_id() -> String {
        SaverConfig::default().script_id
    }

    #[tokio::test]
    async fn install_enables_all_then_applies_settings() {
        let h = harness(json!({"ads": false, "images": true, "media": true}));
        assert_eq!(h.coordinator.state(), CoordinatorState::Uninitialized);

        h.coordinator.on_install().await.unwrap();

        let requests = h.rulesets.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], RulesetUpdate::enable_all());
        assert_eq!(
            requests[1],
            RulesetUpdate {
                enable: RulesetSet::IMAGES | RulesetSet::MEDIA,
                disable: RulesetSet::ADS,
            }
        );
        assert_eq!(h.rulesets.enabled(), RulesetSet::IMAGES | RulesetSet::MEDIA);
        assert!(h.scripts.is_registered(&script_id()));
        assert_eq!(h.coordinator.state(), CoordinatorState::Converged);
    }

    #[tokio::test]
    async fn install_with_empty_store_enables_everything() {
        let h = harness(json!({}));
        h.coordinator.on_install().await.unwrap();
        assert_eq!(h.rulesets.enabled(), RulesetSet::UNIVERSE);
        assert!(h.scripts.is_registered(&script_id()));
    }

    #[tokio::test]
    async fn install_with_media_off_keeps_script_unregistered() {
        let h = harness(json!({"media": false}));
        h.coordinator.on_install().await.unwrap();
        assert_eq!(h.rulesets.enabled(), RulesetSet::ADS | RulesetSet::IMAGES);
        assert!(h.scripts.registered().is_empty());
    }

    #[tokio::test]
    async fn startup_replaces_stale_registration() {
        let h = harness(json!({"media": true}));
        h.scripts
            .register(SaverConfig::default().script_definition())
            .await
            .unwrap();

        h.coordinator.on_startup().await.unwrap();

        assert_eq!(h.scripts.registered().len(), 1);
        assert_eq!(h.scripts.register_calls(), 2);
    }

    #[tokio::test]
    async fn startup_without_cleanup_keeps_single_registration() {
        let store = MemorySettingsStore::new("sync");
        let scripts = MemoryScriptEngine::new();
        let config = SaverConfig {
            clear_stale_registration_on_startup: false,
            ..SaverConfig::default()
        };
        scripts.register(config.script_definition()).await.unwrap();
        let coordinator =
            LifecycleCoordinator::new(config, store, MemoryRulesetEngine::new(), scripts.clone());

        coordinator.on_startup().await.unwrap();

        assert_eq!(scripts.registered().len(), 1);
        assert_eq!(scripts.register_calls(), 1);
    }

    #[tokio::test]
    async fn media_change_toggles_registration() {
        let h = harness(json!({}));
        h.coordinator.on_install().await.unwrap();

        let off = StorageChanges::default().with("media", Some(true), Some(false));
        h.coordinator.on_settings_changed("sync", &off).await.unwrap();
        assert!(h.scripts.registered().is_empty());

        // repeating the same change is a no-op
        h.coordinator.on_settings_changed("sync", &off).await.unwrap();
        assert!(h.scripts.registered().is_empty());

        let on = StorageChanges::default().with("media", Some(false), Some(true));
        h.coordinator.on_settings_changed("sync", &on).await.unwrap();
        assert!(h.scripts.is_registered(&script_id()));
    }

    #[tokio::test]
    async fn changes_in_other_areas_are_ignored() {
        let h = harness(json!({}));
        h.coordinator.on_install().await.unwrap();

        let off = StorageChanges::default().with("media", Some(true), Some(false));
        h.coordinator.on_settings_changed("local", &off).await.unwrap();
        assert!(h.scripts.is_registered(&script_id()));
    }

    #[tokio::test]
    async fn non_media_changes_leave_rulesets_to_writer() {
        let h = harness(json!({}));
        h.coordinator.on_install().await.unwrap();
        let before = h.rulesets.requests().len();

        let ads = StorageChanges::default().with("ads", Some(true), Some(false));
        h.coordinator.on_settings_changed("sync", &ads).await.unwrap();
        assert_eq!(h.rulesets.requests().len(), before);
    }

    #[tokio::test]
    async fn store_failure_keeps_last_known_state() {
        let h = harness(json!({"ads": false}));
        h.store.set_unavailable(true);

        let result = h.coordinator.on_install().await;
        assert!(matches!(result, Err(ConvergenceError::Store(_))));
        assert_eq!(h.coordinator.state(), CoordinatorState::Uninitialized);
        assert!(h.coordinator.last_error().is_some());
        assert!(h.scripts.registered().is_empty());

        // the next startup is the retry path
        h.store.set_unavailable(false);
        h.coordinator.on_startup().await.unwrap();
        assert_eq!(h.rulesets.enabled(), RulesetSet::IMAGES | RulesetSet::MEDIA);
        assert_eq!(h.coordinator.state(), CoordinatorState::Converged);
        assert!(h.coordinator.last_error().is_none());
    }

    #[tokio::test]
    async fn ruleset_failure_skips_settings_read() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let rulesets = MemoryRulesetEngine::new();
        let scripts = MemoryScriptEngine::new();
        rulesets.fail_next(EngineError::UnknownRuleset("media".into()));
        let coordinator = LifecycleCoordinator::new(
            SaverConfig::default(),
            JournalStore {
                inner: MemorySettingsStore::new("sync"),
                journal: journal.clone(),
            },
            JournalRulesets {
                inner: rulesets.clone(),
                journal: journal.clone(),
            },
            scripts.clone(),
        );

        let err = coordinator.on_install().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(!journal.lock().unwrap().contains(&"read"));
        assert!(rulesets.requests().is_empty());
        assert!(scripts.registered().is_empty());
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
    }

    #[tokio::test]
    async fn popup_save_reaches_registration_through_notification() {
        let h = harness(json!({}));
        let mut notifications = h.store.subscribe();
        h.coordinator.on_install().await.unwrap();

        let popup = PopupSession::new(h.store.clone(), h.rulesets.clone());
        popup
            .save(Settings {
                ads: true,
                images: false,
                media: false,
            })
            .await
            .unwrap();

        while let Ok((area, changes)) = notifications.try_recv() {
            h.coordinator
                .handle(LifecycleEvent::SettingsChanged { area, changes })
                .await;
        }

        assert_eq!(h.rulesets.enabled(), RulesetSet::ADS);
        assert!(h.scripts.registered().is_empty());
    }

    #[tokio::test]
    async fn interleaved_change_wins_over_install() {
        let h = harness(json!({"media": true}));
        let popup = PopupSession::new(h.store.clone(), h.rulesets.clone());
        let latest = Settings {
            ads: true,
            images: true,
            media: false,
        };

        let change = async {
            popup.save(latest).await.unwrap();
            let off = StorageChanges::default().with("media", Some(true), Some(false));
            h.coordinator.on_settings_changed("sync", &off).await
        };
        let (install, changed) = tokio::join!(h.coordinator.on_install(), change);

        assert!(install.is_ok());
        assert!(changed.is_ok());
        assert!(h.scripts.registered().is_empty());
        assert_eq!(h.coordinator.state(), CoordinatorState::Converged);
    }

    #[tokio::test]
    async fn start_drains_event_channel() {
        let h = harness(json!({"images": false}));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(LifecycleEvent::Installed).unwrap();
        tx.send(LifecycleEvent::SettingsChanged {
            area: "sync".into(),
            changes: StorageChanges::default().with("media", Some(true), Some(false)),
        })
        .unwrap();
        drop(tx);

        h.coordinator.start(rx).await;

        assert_eq!(h.rulesets.enabled(), RulesetSet::ADS | RulesetSet::MEDIA);
        assert!(h.scripts.registered().is_empty());
    }

    /// Ruleset engine that records when each request completes.
    struct JournalRulesets {
        inner: MemoryRulesetEngine,
        journal: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RulesetEngine for JournalRulesets {
        async fn update_enabled_rulesets(&self, update: RulesetUpdate) -> Result<(), EngineError> {
            let result = self.inner.update_enabled_rulesets(update).await;
            self.journal.lock().unwrap().push("rulesets");
            result
        }
    }

    /// Store that records when each read starts.
    struct JournalStore {
        inner: MemorySettingsStore,
        journal: Arc<Mutex<Vec<&'static str>>>,
    }

    impl SettingsStore for JournalStore {
        async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, crate::error::StoreError> {
            self.journal.lock().unwrap().push("read");
            self.inner.get(keys).await
        }

        async fn set(&self, values: Map<String, Value>) -> Result<(), crate::error::StoreError> {
            self.inner.set(values).await
        }
    }

    #[tokio::test]
    async fn settings_read_waits_for_ruleset_completion() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let coordinator = LifecycleCoordinator::new(
            SaverConfig::default(),
            JournalStore {
                inner: MemorySettingsStore::new("sync"),
                journal: journal.clone(),
            },
            JournalRulesets {
                inner: MemoryRulesetEngine::new(),
                journal: journal.clone(),
            },
            MemoryScriptEngine::new(),
        );

        coordinator.on_install().await.unwrap();

        assert_eq!(*journal.lock().unwrap(), vec!["rulesets", "read", "rulesets"]);
    }

    #[test]
    fn definition_follows_config() {
        let h = harness(json!({}));
        let definition: &ScriptDefinition = h.coordinator.registrar.definition();
        assert_eq!(definition.id, h.coordinator.config().script_id);
    }
}
