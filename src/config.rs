//! Tunables, loaded from JSON. Every field has a default so a partial (or
//! empty) file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageResult};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StageConfig {
    /// Edge length of the square image the compositing model consumes.
    pub model_input_side: u32,
    /// Maximum number of scene states kept in the undo history.
    pub history_limit: usize,
    /// Memory cap for the history in megabytes. `None` disables the cap.
    pub history_memory_limit_mb: Option<usize>,
    /// Initial product scale (clamped to 0.5..=1.5).
    pub default_scale: f64,
    /// Radius in model-frame pixels of the drop marker on the debug image.
    pub marker_radius: u32,
    pub debug_marker_color: [u8; 4],
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            model_input_side: 1024,
            history_limit: crate::components::history::DEFAULT_HISTORY_LIMIT,
            history_memory_limit_mb: Some(256),
            default_scale: 1.0,
            marker_radius: 12,
            debug_marker_color: [255, 0, 0, 255],
        }
    }
}

impl StageConfig {
    pub fn from_json(json: &str) -> StageResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn load(path: &Path) -> StageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> StageResult<()> {
        if self.model_input_side < 64 || self.model_input_side > 4096 {
            return Err(StageError::Config(format!(
                "model_input_side must be within 64..=4096, got {}",
                self.model_input_side
            )));
        }
        if self.history_limit == 0 {
            return Err(StageError::Config("history_limit must be at least 1".into()));
        }
        if !self.default_scale.is_finite() {
            return Err(StageError::Config("default_scale must be a number".into()));
        }
        Ok(())
    }

    pub fn history_memory_limit_bytes(&self) -> Option<usize> {
        self.history_memory_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        assert_eq!(StageConfig::from_json("{}").unwrap(), StageConfig::default());
    }

    #[test]
    fn partial_override() {
        let config = StageConfig::from_json(r#"{"history_limit": 5, "history_memory_limit_mb": null}"#)
            .unwrap();
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.history_memory_limit_bytes(), None);
        assert_eq!(config.model_input_side, 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            StageConfig::from_json(r#"{"model_input_side": 8}"#),
            Err(StageError::Config(_))
        ));
        assert!(StageConfig::from_json(r#"{"history_limit": 0}"#).is_err());
        assert!(StageConfig::from_json("not json").is_err());
    }

    #[test]
    fn json_round_trip() {
        let config = StageConfig {
            marker_radius: 20,
            ..StageConfig::default()
        };
        let back = StageConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
