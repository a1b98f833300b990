//! Research assistant settings
//!
//! ```yaml
//! max_research_attempts: 3
//! confidence_threshold: 6.0
//! engine:
//!   max_steps: 40
//!   checkpoint:
//!     backend: sqlite
//!     path: ./data/research.db
//! ```
//!
//! Environment variables use the same prefix for both layers:
//! `{PREFIX}_MAX_RESEARCH_ATTEMPTS`, `{PREFIX}_CONFIDENCE_THRESHOLD`, plus the
//! engine variables documented in [`waypoint_core::config`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use waypoint_core::config::{get_env_parse_or, load_config_file};
use waypoint_core::{EngineConfig, FromEnv, GraphError, ValidateConfig};

/// Research passes allowed before synthesis proceeds with what it has
pub const DEFAULT_MAX_RESEARCH_ATTEMPTS: u32 = 3;

/// Confidence (0-10) at or above which research skips validation
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 6.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub max_research_attempts: u32,
    pub confidence_threshold: f64,
    pub engine: EngineConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_research_attempts: DEFAULT_MAX_RESEARCH_ATTEMPTS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            engine: EngineConfig::default(),
        }
    }
}

impl ResearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_research_attempts(mut self, attempts: u32) -> Self {
        self.max_research_attempts = attempts;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Load and validate a YAML or JSON file, chosen by extension
    pub fn load_file(path: impl AsRef<Path>) -> waypoint_core::Result<Self> {
        let config: Self = load_config_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

impl FromEnv for ResearchConfig {
    fn from_env(prefix: &str) -> waypoint_core::Result<Self> {
        let config = Self {
            max_research_attempts: get_env_parse_or(
                &format!("{}_MAX_RESEARCH_ATTEMPTS", prefix),
                DEFAULT_MAX_RESEARCH_ATTEMPTS,
            )?,
            confidence_threshold: get_env_parse_or(
                &format!("{}_CONFIDENCE_THRESHOLD", prefix),
                DEFAULT_CONFIDENCE_THRESHOLD,
            )?,
            engine: EngineConfig::from_env(prefix)?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ValidateConfig for ResearchConfig {
    fn validate(&self) -> waypoint_core::Result<()> {
        if self.max_research_attempts == 0 {
            return Err(GraphError::Configuration(
                "max_research_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=10.0).contains(&self.confidence_threshold) {
            return Err(GraphError::Configuration(format!(
                "confidence_threshold must be within 0-10, got {}",
                self.confidence_threshold
            )));
        }
        self.engine.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ResearchConfig::default();
        assert_eq!(config.max_research_attempts, 3);
        assert_eq!(config.confidence_threshold, 6.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_with_engine_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("research.yaml");
        std::fs::write(
            &path,
            "max_research_attempts: 5\nconfidence_threshold: 7.5\nengine:\n  max_steps: 40\n",
        )
        .unwrap();

        let config = ResearchConfig::load_file(&path).unwrap();
        assert_eq!(config.max_research_attempts, 5);
        assert_eq!(config.confidence_threshold, 7.5);
        assert_eq!(config.engine.max_steps, 40);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let config = ResearchConfig::new().with_confidence_threshold(11.0);
        assert!(matches!(config.validate(), Err(GraphError::Configuration(_))));
        assert!(ResearchConfig::new().with_confidence_threshold(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("WPRESEARCH_ENV_MAX_RESEARCH_ATTEMPTS", "2");
        std::env::set_var("WPRESEARCH_ENV_MAX_STEPS", "12");
        let config = ResearchConfig::from_env("WPRESEARCH_ENV").unwrap();
        assert_eq!(config.max_research_attempts, 2);
        assert_eq!(config.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(config.engine.max_steps, 12);
    }

    #[test]
    fn test_from_env_rejects_zero_attempts() {
        std::env::set_var("WPRESEARCH_ZERO_MAX_RESEARCH_ATTEMPTS", "0");
        assert!(ResearchConfig::from_env("WPRESEARCH_ZERO").is_err());
    }
}
