//! Data Saver Core Library
//!
//! This crate keeps the three enforcement surfaces of the Data Saver
//! extension consistent with the persisted user settings.
//!
//! # Architecture
//!
//! Every browser facility is reached through a narrow async trait: the
//! settings store, the ruleset engine and the script-injection engine. The
//! [`LifecycleCoordinator`] reacts to install, startup and settings-change
//! events and drives the [`RulesetController`] and [`ScriptRegistrar`] to
//! convergence. The [`VideoSuppressor`] runs inside each page once the
//! registrar has injected it.
//!
//! # Modules
//!
//! - `types`: Ruleset identifiers and sets
//! - `settings`: Settings record, defaults and change notifications
//! - `ruleset`: Ruleset enable/disable controller
//! - `script`: Video-suppressor script registration
//! - `coordinator`: Lifecycle state machine
//! - `suppressor`: In-page video suppression
//! - `popup`: Settings editor used by the popup surface
//! - `config`: Build/runtime configuration
//! - `memory`, `dom`: In-memory engines and document tree

pub mod config;
pub mod coordinator;
pub mod dom;
pub mod error;
pub mod memory;
pub mod popup;
pub mod ruleset;
pub mod script;
pub mod settings;
pub mod suppressor;
pub mod types;

// Re-export commonly used types
pub use config::{SaverConfig, StripSource};
pub use coordinator::{CoordinatorState, LifecycleCoordinator, LifecycleEvent};
pub use error::{ConfigError, ConvergenceError, EngineError, StoreError};
pub use popup::PopupSession;
pub use ruleset::{RulesetController, RulesetEngine};
pub use script::{ScriptDefinition, ScriptEngine, ScriptRegistrar};
pub use settings::{Settings, SettingsStore, StorageChange, StorageChanges};
pub use suppressor::{MediaTree, SuppressReport, VideoSuppressor};
pub use types::{RulesetId, RulesetSet, RulesetUpdate};
