//! Video-suppressor script registration.
//!
//! The suppressor has no settings of its own: the presence of its
//! registration is the on/off switch. The registrar keeps at most one
//! registration under the configured identifier.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::EngineError;

/// Pattern matching every page.
pub const MATCH_ALL_URLS: &str = "<all_urls>";

/// When an injected script runs relative to page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    /// Before any page content is parsed
    DocumentStart,
    DocumentEnd,
    #[default]
    DocumentIdle,
}

/// Declarative injection rule, serialized in the browser's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDefinition {
    pub id: String,
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default)]
    pub js: Vec<String>,
    #[serde(default)]
    pub run_at: RunAt,
    #[serde(default)]
    pub all_frames: bool,
}

impl ScriptDefinition {
    /// All pages, all frames, injected before page content.
    pub fn document_start(id: &str, js: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            matches: vec![MATCH_ALL_URLS.to_string()],
            js,
            run_at: RunAt::DocumentStart,
            all_frames: true,
        }
    }
}

/// Script-injection engine.
#[allow(async_fn_in_trait)]
pub trait ScriptEngine {
    /// Registrations among `ids`.
    async fn get_registered(&self, ids: &[String]) -> Result<Vec<ScriptDefinition>, EngineError>;

    /// Register `definition`; an existing id is rejected with
    /// [`EngineError::DuplicateScript`].
    async fn register(&self, definition: ScriptDefinition) -> Result<(), EngineError>;

    /// Remove registrations among `ids`.
    async fn unregister(&self, ids: &[String]) -> Result<(), EngineError>;
}

/// Maps the `media` flag to the presence of the suppressor registration.
pub struct ScriptRegistrar<E> {
    engine: E,
    definition: ScriptDefinition,
    // serializes calls issued from this context
    lock: Mutex<()>,
}

impl<E: ScriptEngine> ScriptRegistrar<E> {
    pub fn new(engine: E, definition: ScriptDefinition) -> Self {
        Self {
            engine,
            definition,
            lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn definition(&self) -> &ScriptDefinition {
        &self.definition
    }

    fn ids(&self) -> [String; 1] {
        [self.definition.id.clone()]
    }

    /// Register or unregister the suppressor.
    pub async fn set_active(&self, active: bool) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        if active {
            self.register().await
        } else {
            self.unregister().await
        }
    }

    async fn register(&self) -> Result<(), EngineError> {
        let existing = self.engine.get_registered(&self.ids()).await?;
        if !existing.is_empty() {
            log::debug!("Script '{}' already registered", self.definition.id);
            return Ok(());
        }

        match self.engine.register(self.definition.clone()).await {
            Ok(()) => {
                log::info!("Script '{}' registered", self.definition.id);
                Ok(())
            }
            // another context registered between the check and the call
            Err(EngineError::DuplicateScript(id)) => {
                log::debug!("Script '{}' registered concurrently", id);
                Ok(())
            }
            Err(e) => {
                log::warn!("Error registering script '{}': {}", self.definition.id, e);
                Err(e)
            }
        }
    }

    async fn unregister(&self) -> Result<(), EngineError> {
        let existing = self.engine.get_registered(&self.ids()).await?;
        if existing.is_empty() {
            log::debug!("Script '{}' not registered", self.definition.id);
            return Ok(());
        }

        match self.engine.unregister(&self.ids()).await {
            Ok(()) => {
                log::info!("Script '{}' unregistered", self.definition.id);
                Ok(())
            }
            // another context unregistered between the check and the call
            Err(EngineError::NonexistentScript(id)) => {
                log::debug!("Script '{}' unregistered concurrently", id);
                Ok(())
            }
            Err(e) => {
                log::warn!("Error unregistering script '{}': {}", self.definition.id, e);
                Err(e)
            }
        }
    }

    /// Drop a registration left over by a previous session.
    ///
    /// The engine may already have forgotten it; that is not an error.
    pub async fn clear_stale(&self) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        self.unregister().await
    }
}
