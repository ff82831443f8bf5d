//! Ruleset enable/disable controller.

use crate::error::EngineError;
use crate::types::{RulesetSet, RulesetUpdate};

/// Network filtering engine holding the pre-authored rulesets.
#[allow(async_fn_in_trait)]
pub trait RulesetEngine {
    /// Apply `update` atomically.
    async fn update_enabled_rulesets(&self, update: RulesetUpdate) -> Result<(), EngineError>;
}

/// Maps desired flags to ruleset engine requests.
pub struct RulesetController<E> {
    engine: E,
}

impl<E: RulesetEngine> RulesetController<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Make `enabled` the exact enabled set.
    ///
    /// Everything in the universe outside `enabled` is disabled in the same
    /// request. Repeating the call with the same set only re-confirms state.
    pub async fn set_enabled(&self, enabled: RulesetSet) -> Result<(), EngineError> {
        let update = RulesetUpdate::exact(enabled);
        match self.engine.update_enabled_rulesets(update).await {
            Ok(()) => {
                log::info!("Rulesets enabled: {}, disabled: {}", update.enable, update.disable);
                Ok(())
            }
            Err(e) => {
                log::warn!("Error updating rulesets to {}: {}", update.enable, e);
                Err(e)
            }
        }
    }

    /// Enable every ruleset without disabling any.
    pub async fn enable_all(&self) -> Result<(), EngineError> {
        match self.engine.update_enabled_rulesets(RulesetUpdate::enable_all()).await {
            Ok(()) => {
                log::info!("Rulesets ensured active");
                Ok(())
            }
            Err(e) => {
                log::warn!("Error enabling rulesets: {}", e);
                Err(e)
            }
        }
    }
}
