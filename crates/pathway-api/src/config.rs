use std::path::Path;

use anyhow::{Context, Result};
use pathway_core::{EngineConfig, TrainingConfig};
use serde::{Deserialize, Serialize};

/// Training and serving tunables, loaded from YAML. Missing sections and keys take
/// the engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathwayConfig {
    pub engine: EngineConfig,
    pub training: TrainingConfig,
}

impl PathwayConfig {
    /// Read and validate a YAML config file.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not valid YAML for this
    /// layout, or holds an out-of-range setting.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate YAML config text.
    ///
    /// # Errors
    /// Returns an error when the text does not deserialize or fails validation.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns the first [`pathway_core::PathwayError::Validation`] raised by either section.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.training.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathway_core::{KRange, PathwayError};

    // Test IDs: TCFG-001
    #[test]
    fn yaml_overrides_merge_with_defaults() -> Result<()> {
        let config = PathwayConfig::parse(
            "engine:\n  cohort_breadth: 3\n  accessibility_floor: 0.6\n\
             training:\n  seed: 7\n  k_ranges:\n\
             \x20   accessibility: {min: 2, max: 6}\n\
             \x20   academic: {min: 2, max: 6}\n\
             \x20   subject_focus: {min: 4, max: 12}\n\
             \x20   format: {min: 3, max: 9}\n",
        )?;
        assert_eq!(config.engine.cohort_breadth, 3);
        assert!((config.engine.accessibility_floor - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.engine.default_top_n, EngineConfig::default().default_top_n);
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.training.k_ranges.format, KRange::new(3, 9));
        assert_eq!(config.training.k_ranges.subject_focus, KRange::new(4, 12));
        assert_eq!(config.training.n_init, TrainingConfig::default().n_init);
        Ok(())
    }

    #[test]
    fn empty_document_is_the_default_config() -> Result<()> {
        assert_eq!(PathwayConfig::parse("{}")?, PathwayConfig::default());
        Ok(())
    }

    // Test IDs: TCFG-002
    #[test]
    fn out_of_range_values_fail_validation() {
        let err = match PathwayConfig::parse("engine:\n  min_similarity: 1.5\n") {
            Ok(_) => panic!("min_similarity above 1 should be rejected"),
            Err(err) => err,
        };
        let validation = err.downcast_ref::<PathwayError>();
        assert!(
            matches!(validation, Some(PathwayError::Validation(message))
                if message.contains("min_similarity")),
            "{err:#}"
        );

        assert!(PathwayConfig::parse("training:\n  n_init: 0\n").is_err());
    }
}
