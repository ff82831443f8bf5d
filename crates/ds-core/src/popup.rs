//! Settings editor behind the popup surface.
//!
//! The popup reads the current settings, and on save writes all three keys in
//! one mutation and then applies the ruleset split itself. It never touches
//! the script registration: the coordinator picks `media` up from the
//! store's change notification.

use crate::error::ConvergenceError;
use crate::ruleset::{RulesetController, RulesetEngine};
use crate::settings::{read_settings, Settings, SettingsStore};

pub struct PopupSession<S, R> {
    store: S,
    rulesets: RulesetController<R>,
}

impl<S: SettingsStore, R: RulesetEngine> PopupSession<S, R> {
    pub fn new(store: S, ruleset_engine: R) -> Self {
        Self {
            store,
            rulesets: RulesetController::new(ruleset_engine),
        }
    }

    /// Settings to show, defaults applied.
    pub async fn load(&self) -> Result<Settings, ConvergenceError> {
        Ok(read_settings(&self.store).await?)
    }

    /// Persist `settings`, then update the rulesets once the write is acknowledged.
    pub async fn save(&self, settings: Settings) -> Result<(), ConvergenceError> {
        if let Err(e) = self.store.set(settings.to_stored()).await {
            log::warn!("Error saving settings: {}", e);
            return Err(e.into());
        }
        self.rulesets.set_enabled(settings.enabled_rulesets()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRulesetEngine, MemorySettingsStore};
    use crate::types::RulesetSet;

    #[tokio::test]
    async fn load_defaults_when_store_is_empty() {
        let popup = PopupSession::new(MemorySettingsStore::new("sync"), MemoryRulesetEngine::new());
        assert_eq!(popup.load().await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn save_writes_then_applies_rulesets() {
        let store = MemorySettingsStore::new("sync");
        let engine = MemoryRulesetEngine::new();
        let popup = PopupSession::new(store.clone(), engine.clone());

        let settings = Settings {
            ads: true,
            images: false,
            media: false,
        };
        popup.save(settings).await.unwrap();

        assert_eq!(popup.load().await.unwrap(), settings);
        assert_eq!(engine.enabled(), RulesetSet::ADS);
    }

    #[tokio::test]
    async fn failed_write_leaves_rulesets_alone() {
        let store = MemorySettingsStore::new("sync");
        store.set_unavailable(true);
        let engine = MemoryRulesetEngine::new();
        let popup = PopupSession::new(store, engine.clone());

        let result = popup
            .save(Settings {
                ads: false,
                images: false,
                media: false,
            })
            .await;

        assert!(matches!(result, Err(ConvergenceError::Store(_))));
        assert!(engine.requests().is_empty());
    }
}
