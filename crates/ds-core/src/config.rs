//! Extension configuration.
//!
//! Collapses the behavioural differences between deployments into explicit
//! policy flags. Every field has a default, so a partial JSON document is
//! accepted.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::script::ScriptDefinition;

/// Whether the suppressor strips video sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripSource {
    /// Always drop the source of every video
    #[default]
    Always,
    /// Leave the source alone inside a page marked as showing a visible player
    SkipWhenVisiblePlayer,
}

/// Runtime configuration of the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaverConfig {
    /// Identifier of the video-suppressor script registration
    pub script_id: String,

    /// Script files injected by the registration
    pub script_files: Vec<String>,

    /// Storage area whose change notifications are honoured
    pub settings_area: String,

    /// Source-stripping policy of the suppressor
    pub strip_source: StripSource,

    /// Attribute marking a page that intentionally shows a player
    pub visible_player_marker: String,

    /// Remove a registration left over by a previous session before
    /// re-deriving it on startup
    pub clear_stale_registration_on_startup: bool,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            script_id: "data-saver-media-blocker".to_string(),
            script_files: vec!["stop_all_videos.js".to_string()],
            settings_area: "sync".to_string(),
            strip_source: StripSource::Always,
            visible_player_marker: "data-visible-player".to_string(),
            clear_stale_registration_on_startup: true,
        }
    }
}

impl SaverConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "script_id",
                message: "must not be empty".to_string(),
            });
        }
        if self.script_files.is_empty() {
            return Err(ConfigError::Invalid {
                field: "script_files",
                message: "at least one script file is required".to_string(),
            });
        }
        if self.visible_player_marker.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "visible_player_marker",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Registration definition for the video suppressor.
    pub fn script_definition(&self) -> ScriptDefinition {
        ScriptDefinition::document_start(&self.script_id, self.script_files.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SaverConfig::from_json(r#"{"strip_source": "skip_when_visible_player"}"#).unwrap();
        assert_eq!(config.strip_source, StripSource::SkipWhenVisiblePlayer);
        assert_eq!(config.script_id, "data-saver-media-blocker");
        assert!(config.clear_stale_registration_on_startup);
    }

    #[test]
    fn test_rejects_empty_script_id() {
        let err = SaverConfig::from_json(r#"{"script_id": " "}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "script_id", .. }));
    }

    #[test]
    fn test_rejects_unknown_policy() {
        assert!(matches!(
            SaverConfig::from_json(r#"{"strip_source": "sometimes"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_definition_uses_configured_id() {
        let config = SaverConfig {
            script_id: "custom".to_string(),
            ..SaverConfig::default()
        };
        let definition = config.script_definition();
        assert_eq!(definition.id, "custom");
        assert_eq!(definition.js, vec!["stop_all_videos.js".to_string()]);
    }
}
