use serde::{Deserialize, Serialize};

use crate::dimension::{Dimension, DimensionMap};
use crate::error::PathwayError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KRange {
    pub min: usize,
    pub max: usize,
}

impl KRange {
    #[must_use]
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }
}

impl Default for DimensionMap<KRange> {
    fn default() -> Self {
        Self {
            accessibility: KRange::new(6, 15),
            academic: KRange::new(6, 12),
            subject_focus: KRange::new(12, 20),
            format: KRange::new(8, 15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimilarityConfig {
    pub max_features: usize,
    /// Minimum number of documents a term must appear in.
    pub min_df: usize,
    /// Maximum share of documents a term may appear in.
    pub max_df: f32,
    pub ngram_max: usize,
    pub stop_words: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self { max_features: 500, min_df: 2, max_df: 0.8, ngram_max: 2, stop_words: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    pub n_init: usize,
    pub max_iterations: usize,
    pub tolerance: f32,
    pub min_silhouette: f32,
    /// Silhouette is computed on at most this many rows.
    pub silhouette_sample: usize,
    pub k_ranges: DimensionMap<KRange>,
    pub allow_low_confidence: bool,
    pub low_barrier_max_financial: f32,
    pub low_barrier_max_cost: f32,
    /// Cohorts with fewer members are reported as small.
    pub small_cohort: usize,
    /// Cohorts with more members are reported as large.
    pub large_cohort: usize,
    pub similarity: SimilarityConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_init: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            min_silhouette: 0.15,
            silhouette_sample: 2_000,
            k_ranges: DimensionMap::default(),
            allow_low_confidence: false,
            low_barrier_max_financial: 0.5,
            low_barrier_max_cost: 1.0,
            small_cohort: 20,
            large_cohort: 400,
            similarity: SimilarityConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// # Errors
    /// Returns [`PathwayError::Validation`] naming the first out-of-range setting.
    pub fn validate(&self) -> Result<(), PathwayError> {
        if self.n_init == 0 {
            return Err(invalid("training.n_init MUST be >= 1"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("training.max_iterations MUST be >= 1"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(invalid("training.tolerance MUST be a finite non-negative number"));
        }
        if !(-1.0..=1.0).contains(&self.min_silhouette) {
            return Err(invalid("training.min_silhouette MUST be in [-1.0, 1.0]"));
        }
        if self.silhouette_sample < 2 {
            return Err(invalid("training.silhouette_sample MUST be >= 2"));
        }
        for dimension in Dimension::ALL {
            let range = self.k_ranges.get(dimension);
            if range.min < 2 {
                return Err(invalid(&format!(
                    "training.k_ranges.{}.min MUST be >= 2",
                    dimension.as_str()
                )));
            }
            if range.min > range.max {
                return Err(invalid(&format!(
                    "training.k_ranges.{} MUST satisfy min <= max",
                    dimension.as_str()
                )));
            }
        }
        if self.small_cohort > self.large_cohort {
            return Err(invalid("training.small_cohort MUST be <= training.large_cohort"));
        }
        if self.similarity.max_features == 0 {
            return Err(invalid("training.similarity.max_features MUST be >= 1"));
        }
        if self.similarity.min_df == 0 {
            return Err(invalid("training.similarity.min_df MUST be >= 1"));
        }
        if !(self.similarity.max_df > 0.0 && self.similarity.max_df <= 1.0) {
            return Err(invalid("training.similarity.max_df MUST be in (0.0, 1.0]"));
        }
        if !(1..=3).contains(&self.similarity.ngram_max) {
            return Err(invalid("training.similarity.ngram_max MUST be in [1, 3]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Cohorts taken per dimension in the strict candidate step.
    pub cohort_breadth: usize,
    pub min_candidates: usize,
    pub min_similarity: f32,
    pub accessibility_floor: f32,
    pub default_top_n: usize,
    pub max_top_n: usize,
    /// Grade distance still reported as appropriate in result reasons.
    pub grade_tolerance: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cohort_breadth: 5,
            min_candidates: 50,
            min_similarity: 0.2,
            accessibility_floor: 0.5,
            default_top_n: 20,
            max_top_n: 100,
            grade_tolerance: 1.0,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// Returns [`PathwayError::Validation`] naming the first out-of-range setting.
    pub fn validate(&self) -> Result<(), PathwayError> {
        if self.cohort_breadth == 0 {
            return Err(invalid("engine.cohort_breadth MUST be >= 1"));
        }
        if self.min_candidates == 0 {
            return Err(invalid("engine.min_candidates MUST be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(invalid("engine.min_similarity MUST be in [0.0, 1.0]"));
        }
        if !(0.0..=1.0).contains(&self.accessibility_floor) {
            return Err(invalid("engine.accessibility_floor MUST be in [0.0, 1.0]"));
        }
        if self.default_top_n == 0 || self.default_top_n > self.max_top_n {
            return Err(invalid("engine.default_top_n MUST be in [1, engine.max_top_n]"));
        }
        if !self.grade_tolerance.is_finite() || self.grade_tolerance < 0.0 {
            return Err(invalid("engine.grade_tolerance MUST be a finite non-negative number"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> PathwayError {
    PathwayError::Validation(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
        assert!(EngineConfig::default().validate().is_ok());
        assert_eq!(TrainingConfig::default().k_ranges.subject_focus, KRange::new(12, 20));
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: EngineConfig = match serde_json::from_value(serde_json::json!({
            "cohort_breadth": 2
        })) {
            Ok(config) => config,
            Err(err) => panic!("engine config should deserialize: {err}"),
        };
        assert_eq!(config.cohort_breadth, 2);
        assert_eq!(config.default_top_n, 20);
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let config = EngineConfig { accessibility_floor: 1.5, ..EngineConfig::default() };
        assert!(matches!(config.validate(), Err(PathwayError::Validation(message))
            if message.contains("accessibility_floor")));

        let mut training = TrainingConfig::default();
        training.k_ranges.format = KRange::new(9, 4);
        assert!(matches!(training.validate(), Err(PathwayError::Validation(message))
            if message.contains("k_ranges.format")));

        let training = TrainingConfig { n_init: 0, ..TrainingConfig::default() };
        assert!(training.validate().is_err());
        let training =
            TrainingConfig { small_cohort: 500, large_cohort: 400, ..TrainingConfig::default() };
        assert!(matches!(training.validate(), Err(PathwayError::Validation(message))
            if message.contains("small_cohort")));
    }
}
