//! Error types for the Data Saver core.

/// Error type for settings store access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Settings store unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed settings payload: {0}")]
    Malformed(String),
}

/// Error type for the ruleset and script-injection engines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown ruleset id: {0}")]
    UnknownRuleset(String),
    #[error("Duplicate script id: {0}")]
    DuplicateScript(String),
    #[error("Nonexistent script id: {0}")]
    NonexistentScript(String),
    #[error("Invalid script definition: {0}")]
    InvalidDefinition(String),
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Misconfiguration that only a corrected build can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownRuleset(_) | Self::InvalidDefinition(_))
    }
}

/// Failure of one convergence step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvergenceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ConvergenceError {
    /// Whether the next triggering event can be expected to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::Engine(e) => !e.is_fatal(),
        }
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}
