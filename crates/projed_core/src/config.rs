//! Language and editor configuration.
//!
//! # Responsibility
//! - Carry the `@config` block of a metamodel (language name, raw settings).
//! - Derive validated editor settings with defaults.
//!
//! # Invariants
//! - `history_capacity` is at least 1.
//! - `log_level` is always one of the levels accepted by `init_logging`.

use crate::logging::{default_log_level, normalize_level};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Default number of restore points kept by the state log.
pub const DEFAULT_HISTORY_CAPACITY: usize = 8;

const HISTORY_CAPACITY_KEY: &str = "history_capacity";
const UNDO_DEPTH_KEY: &str = "undo_depth";
const LOG_LEVEL_KEY: &str = "log_level";

/// `@config` block of a metamodel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub language: Option<String>,
    pub settings: BTreeMap<String, Value>,
}

impl LanguageConfig {
    /// Overlays `other`: its language wins when set, settings merge by key.
    pub fn merge(&mut self, other: LanguageConfig) {
        if other.language.is_some() {
            self.language = other.language;
        }
        self.settings.extend(other.settings);
    }
}

/// Invalid `@config.settings` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidSetting { key: String, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSetting { key, message } => {
                write!(f, "invalid setting `{key}`: {message}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Settings consumed by an editor session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorConfig {
    pub language: Option<String>,
    /// Maximum retained restore points.
    pub history_capacity: usize,
    /// Maximum undo depth; `None` keeps every step.
    pub undo_depth: Option<usize>,
    pub log_level: &'static str,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            language: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            undo_depth: None,
            log_level: default_log_level(),
        }
    }
}

impl EditorConfig {
    /// Builds editor settings from a language config.
    ///
    /// Unknown settings keys are ignored.
    ///
    /// # Errors
    /// - `history_capacity` is not a positive integer.
    /// - `undo_depth` is not a non-negative integer.
    /// - `log_level` is not a supported level name.
    pub fn from_language(config: &LanguageConfig) -> Result<Self, ConfigError> {
        let mut editor = Self {
            language: config.language.clone(),
            ..Self::default()
        };

        if let Some(value) = config.settings.get(HISTORY_CAPACITY_KEY) {
            let capacity = positive_integer(HISTORY_CAPACITY_KEY, value)?;
            if capacity == 0 {
                return Err(invalid(HISTORY_CAPACITY_KEY, "must be at least 1"));
            }
            editor.history_capacity = capacity;
        }
        if let Some(value) = config.settings.get(UNDO_DEPTH_KEY) {
            editor.undo_depth = Some(positive_integer(UNDO_DEPTH_KEY, value)?);
        }
        if let Some(value) = config.settings.get(LOG_LEVEL_KEY) {
            let raw = value
                .as_str()
                .ok_or_else(|| invalid(LOG_LEVEL_KEY, "expected a string"))?;
            editor.log_level =
                normalize_level(raw).map_err(|err| invalid(LOG_LEVEL_KEY, &err.to_string()))?;
        }
        Ok(editor)
    }
}

fn positive_integer(key: &str, value: &Value) -> Result<usize, ConfigError> {
    value
        .as_u64()
        .and_then(|raw| usize::try_from(raw).ok())
        .ok_or_else(|| invalid(key, "expected a non-negative integer"))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EditorConfig, LanguageConfig, DEFAULT_HISTORY_CAPACITY};
    use serde_json::json;

    fn language(settings: serde_json::Value) -> LanguageConfig {
        serde_json::from_value(json!({ "language": "demo", "settings": settings }))
            .expect("config should decode")
    }

    #[test]
    fn defaults_apply_when_settings_are_absent() {
        let config = EditorConfig::from_language(&LanguageConfig::default())
            .expect("empty config is valid");
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.undo_depth, None);
    }

    #[test]
    fn reads_known_settings() {
        let config = EditorConfig::from_language(&language(json!({
            "history_capacity": 3,
            "undo_depth": 20,
            "log_level": "WARNING"
        })))
        .expect("settings are valid");

        assert_eq!(config.language.as_deref(), Some("demo"));
        assert_eq!(config.history_capacity, 3);
        assert_eq!(config.undo_depth, Some(20));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = EditorConfig::from_language(&language(json!({ "history_capacity": 0 })))
            .expect_err("zero capacity must fail");
        assert!(matches!(err, ConfigError::InvalidSetting { key, .. } if key == "history_capacity"));
    }

    #[test]
    fn merge_overlays_settings() {
        let mut base = language(json!({ "history_capacity": 3 }));
        base.merge(LanguageConfig {
            language: None,
            settings: [("undo_depth".to_string(), json!(2))].into_iter().collect(),
        });
        assert_eq!(base.language.as_deref(), Some("demo"));
        assert_eq!(base.settings.len(), 2);
    }
}
