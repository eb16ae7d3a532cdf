use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cluster::ClusterIndex;
use crate::config::TrainingConfig;
use crate::dimension::{Dimension, DimensionMap};
use crate::encoder::{EncodedResource, EncoderOptions, FeatureEncoder};
use crate::error::PathwayError;
use crate::resource::{Resource, ResourceId};
use crate::similarity::SimilarityIndex;
use crate::taxonomy::MAPPING_TABLE_VERSION;

pub const BUNDLE_FORMAT_VERSION: &str = "bundle.v1";

const FINANCIAL_BARRIER_COLUMN: usize = 0;
const COST_CATEGORY_COLUMN: usize = 2;

/// Caller-supplied identity for a training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleIdentity {
    pub bundle_id: String,
    pub catalog_digest: String,
    pub trained_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleMetadata {
    pub bundle_id: String,
    pub bundle_format_version: String,
    pub mapping_table_version: String,
    pub catalog_digest: String,
    pub resource_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub trained_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelBundle {
    pub metadata: BundleMetadata,
    pub training_config: TrainingConfig,
    pub encoder: FeatureEncoder,
    pub indexes: DimensionMap<ClusterIndex>,
    pub similarity: SimilarityIndex,
    /// Accessibility cohorts whose members are, on average, free or nearly so.
    pub low_barrier_cohorts: BTreeSet<usize>,
    /// Resources held out of accessibility training because a predicted value was imputed.
    pub imputed_accessibility: Vec<ResourceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionSummary {
    pub dimension: Dimension,
    pub k: usize,
    pub silhouette: f32,
    pub davies_bouldin: f32,
    pub training_rows: usize,
    /// Members per cohort, indexed by cohort.
    #[serde(default)]
    pub cohort_sizes: Vec<usize>,
    /// Cohorts below `training.small_cohort` members.
    #[serde(default)]
    pub small_cohorts: Vec<usize>,
    /// Cohorts above `training.large_cohort` members.
    #[serde(default)]
    pub large_cohorts: Vec<usize>,
}

impl DimensionSummary {
    fn from_index(dimension: Dimension, index: &ClusterIndex, config: &TrainingConfig) -> Self {
        let cohort_sizes = index.cohort_sizes();
        let small_cohorts = cohorts_where(&cohort_sizes, |size| size < config.small_cohort);
        let large_cohorts = cohorts_where(&cohort_sizes, |size| size > config.large_cohort);
        Self {
            dimension,
            k: index.cohort_count(),
            silhouette: index.quality.silhouette,
            davies_bouldin: index.quality.davies_bouldin,
            training_rows: index.quality.training_rows,
            cohort_sizes,
            small_cohorts,
            large_cohorts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSummary {
    pub bundle_id: String,
    pub mapping_table_version: String,
    pub resource_count: usize,
    pub imputed_accessibility_rows: usize,
    pub vocabulary_size: usize,
    pub low_barrier_cohorts: Vec<usize>,
    pub dimensions: Vec<DimensionSummary>,
}

impl ModelBundle {
    /// Fit the encoder, train all four cohort models, and index resource text.
    ///
    /// # Errors
    /// Returns [`PathwayError::Validation`] for an invalid config or resource,
    /// [`PathwayError::Schema`] for an empty catalog or duplicate ids, and
    /// [`PathwayError::Quality`] when any dimension misses the silhouette floor.
    pub fn train(
        resources: &[Resource],
        config: &TrainingConfig,
        identity: BundleIdentity,
    ) -> Result<Self, PathwayError> {
        config.validate()?;
        let mut seen = BTreeSet::new();
        for resource in resources {
            resource.validate()?;
            if !seen.insert(resource.resource_id) {
                return Err(PathwayError::Schema(format!(
                    "catalog repeats resource_id {}",
                    resource.resource_id
                )));
            }
        }

        let encoder = FeatureEncoder::fit(
            resources,
            EncoderOptions { allow_low_confidence: config.allow_low_confidence },
        )?;
        let encoded =
            resources.iter().map(|resource| encoder.encode_resource(resource)).collect::<Vec<_>>();
        let imputed_accessibility = encoded
            .iter()
            .filter(|row| !row.trains(Dimension::Accessibility))
            .map(|row| row.resource_id)
            .collect::<Vec<_>>();
        if !imputed_accessibility.is_empty() {
            tracing::info!(
                rows = imputed_accessibility.len(),
                "holding imputed rows out of accessibility training"
            );
        }

        let indexes =
            DimensionMap::try_build(|dimension| train_dimension(dimension, &encoded, config))?;
        for (dimension, index) in indexes.iter() {
            let summary = DimensionSummary::from_index(dimension, index, config);
            if !summary.small_cohorts.is_empty() || !summary.large_cohorts.is_empty() {
                tracing::warn!(
                    dimension = dimension.as_str(),
                    small = ?summary.small_cohorts,
                    large = ?summary.large_cohorts,
                    sizes = ?summary.cohort_sizes,
                    "cohort sizes outside [{}, {}]",
                    config.small_cohort,
                    config.large_cohort
                );
            }
        }

        let corpus =
            encoded.iter().map(|row| (row.resource_id, row.text.clone())).collect::<Vec<_>>();
        let similarity = SimilarityIndex::build(&corpus, &config.similarity)?;

        let low_barrier_cohorts =
            classify_low_barrier(&encoder, &indexes.accessibility, &encoded, config);
        tracing::info!(
            bundle_id = identity.bundle_id.as_str(),
            resources = resources.len(),
            low_barrier_cohorts = low_barrier_cohorts.len(),
            "trained model bundle"
        );

        Ok(Self {
            metadata: BundleMetadata {
                bundle_id: identity.bundle_id,
                bundle_format_version: BUNDLE_FORMAT_VERSION.to_string(),
                mapping_table_version: MAPPING_TABLE_VERSION.to_string(),
                catalog_digest: identity.catalog_digest,
                resource_count: resources.len(),
                trained_at: identity.trained_at,
            },
            training_config: config.clone(),
            encoder,
            indexes,
            similarity,
            low_barrier_cohorts,
            imputed_accessibility,
        })
    }

    /// Reject bundles produced under a different mapping table or bundle layout.
    ///
    /// # Errors
    /// Returns [`PathwayError::Schema`] naming the mismatched version.
    pub fn check_versions(&self) -> Result<(), PathwayError> {
        if self.metadata.mapping_table_version != MAPPING_TABLE_VERSION
            || self.encoder.mapping_table_version != MAPPING_TABLE_VERSION
        {
            return Err(PathwayError::Schema(format!(
                "bundle {} uses mapping table {}, expected {MAPPING_TABLE_VERSION}",
                self.metadata.bundle_id, self.metadata.mapping_table_version
            )));
        }
        if self.metadata.bundle_format_version != BUNDLE_FORMAT_VERSION {
            return Err(PathwayError::Schema(format!(
                "bundle {} has format {}, expected {BUNDLE_FORMAT_VERSION}",
                self.metadata.bundle_id, self.metadata.bundle_format_version
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_low_barrier(&self, cohort: usize) -> bool {
        self.low_barrier_cohorts.contains(&cohort)
    }

    #[must_use]
    pub fn summary(&self) -> TrainingSummary {
        TrainingSummary {
            bundle_id: self.metadata.bundle_id.clone(),
            mapping_table_version: self.metadata.mapping_table_version.clone(),
            resource_count: self.metadata.resource_count,
            imputed_accessibility_rows: self.imputed_accessibility.len(),
            vocabulary_size: self.similarity.vocabulary.len(),
            low_barrier_cohorts: self.low_barrier_cohorts.iter().copied().collect(),
            dimensions: self
                .indexes
                .iter()
                .map(|(dimension, index)| {
                    DimensionSummary::from_index(dimension, index, &self.training_config)
                })
                .collect(),
        }
    }
}

fn cohorts_where(sizes: &[usize], keep: impl Fn(usize) -> bool) -> Vec<usize> {
    sizes.iter().enumerate().filter(|(_, size)| keep(**size)).map(|(cohort, _)| cohort).collect()
}

fn train_dimension(
    dimension: Dimension,
    encoded: &[EncodedResource],
    config: &TrainingConfig,
) -> Result<ClusterIndex, PathwayError> {
    let (training, held_out): (Vec<_>, Vec<_>) =
        encoded.iter().partition(|row| row.trains(dimension));
    let rows = training
        .iter()
        .map(|row| (row.resource_id, row.vectors.get(dimension).clone()))
        .collect::<Vec<_>>();
    let mut index = ClusterIndex::train(dimension, &rows, config)?;
    for row in held_out {
        index.assign(row.resource_id, row.vectors.get(dimension))?;
    }
    Ok(index)
}

/// A cohort is low-barrier when its members' effective barrier and cost ordinals
/// average at or below the configured ceilings.
fn classify_low_barrier(
    encoder: &FeatureEncoder,
    index: &ClusterIndex,
    encoded: &[EncodedResource],
    config: &TrainingConfig,
) -> BTreeSet<usize> {
    let mut totals = BTreeMap::<usize, (f32, f32, usize)>::new();
    for row in encoded {
        let Some(cohort) = index.cohort_of(row.resource_id) else {
            continue;
        };
        let ordinals = encoder.accessibility_ordinals(&row.vectors.accessibility);
        let entry = totals.entry(cohort).or_insert((0.0, 0.0, 0));
        entry.0 += ordinals.get(FINANCIAL_BARRIER_COLUMN).copied().unwrap_or_default();
        entry.1 += ordinals.get(COST_CATEGORY_COLUMN).copied().unwrap_or_default();
        entry.2 += 1;
    }
    totals
        .into_iter()
        .filter(|(_, (barrier, cost, count))| {
            #[allow(clippy::cast_precision_loss)]
            let count = *count as f32;
            barrier / count <= config.low_barrier_max_financial
                && cost / count <= config.low_barrier_max_cost
        })
        .map(|(cohort, _)| cohort)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{mk_catalog, test_training_config};
    use crate::resource::{Predicted, ReliabilityFlag};
    use crate::taxonomy::FinancialBarrier;

    fn identity() -> BundleIdentity {
        BundleIdentity {
            bundle_id: "bundle-test".to_string(),
            catalog_digest: "digest".to_string(),
            trained_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn trained(resources: &[Resource]) -> ModelBundle {
        match ModelBundle::train(resources, &test_training_config(), identity()) {
            Ok(bundle) => bundle,
            Err(err) => panic!("training should succeed: {err}"),
        }
    }

    // Test IDs: TBUN-001
    #[test]
    fn fixture_catalog_recovers_its_generating_structure() {
        let bundle = trained(&mk_catalog());
        assert_eq!(bundle.indexes.subject_focus.cohort_count(), 4);
        assert_eq!(bundle.indexes.accessibility.cohort_count(), 2);
        assert_eq!(bundle.indexes.academic.cohort_count(), 2);
        assert_eq!(bundle.indexes.format.cohort_count(), 6);
        for (_, index) in bundle.indexes.iter() {
            assert_eq!(index.assignments.len(), 48);
            assert!((index.quality.silhouette - 1.0).abs() < 1e-5);
        }
        assert_eq!(bundle.metadata.mapping_table_version, MAPPING_TABLE_VERSION);
        assert_eq!(bundle.metadata.resource_count, 48);
    }

    // Test IDs: TBUN-002
    #[test]
    fn only_the_free_cohort_is_low_barrier() {
        let bundle = trained(&mk_catalog());
        assert_eq!(bundle.low_barrier_cohorts.len(), 1);
        let free_cohort = bundle
            .indexes
            .accessibility
            .cohort_of(ResourceId(1))
            .unwrap_or_else(|| panic!("resource 1 has a cohort"));
        assert!(bundle.is_low_barrier(free_cohort));
        let premium_cohort = bundle
            .indexes
            .accessibility
            .cohort_of(ResourceId(7))
            .unwrap_or_else(|| panic!("resource 7 has a cohort"));
        assert!(!bundle.is_low_barrier(premium_cohort));
    }

    // Test IDs: TBUN-003
    #[test]
    fn imputed_rows_are_held_out_then_assigned() {
        let mut catalog = mk_catalog();
        catalog[0].accessibility.financial_barrier = Predicted {
            value: Some(FinancialBarrier::Prohibitive),
            reliability: ReliabilityFlag::LowConfidencePredicted,
        };
        let bundle = trained(&catalog);
        assert_eq!(bundle.imputed_accessibility, vec![ResourceId(1)]);
        assert_eq!(bundle.indexes.accessibility.quality.training_rows, 47);
        assert!(bundle.indexes.accessibility.cohort_of(ResourceId(1)).is_some());
        assert_eq!(bundle.indexes.academic.quality.training_rows, 48);
        assert_eq!(bundle.summary().imputed_accessibility_rows, 1);
    }

    // Test IDs: TBUN-004
    #[test]
    fn training_is_reproducible_and_serializes() {
        let first = trained(&mk_catalog());
        let second = trained(&mk_catalog());
        assert_eq!(first, second);

        let payload = match serde_json::to_string(&first) {
            Ok(payload) => payload,
            Err(err) => panic!("bundle should serialize: {err}"),
        };
        let restored: ModelBundle = match serde_json::from_str(&payload) {
            Ok(bundle) => bundle,
            Err(err) => panic!("bundle should deserialize: {err}"),
        };
        assert_eq!(restored.indexes, first.indexes);
        assert_eq!(restored.low_barrier_cohorts, first.low_barrier_cohorts);
        assert_eq!(restored.metadata, first.metadata);
    }

    // Test IDs: TBUN-005
    #[test]
    fn summary_reports_cohort_sizes_against_configured_bounds() {
        let bundle = trained(&mk_catalog());
        let summary = bundle.summary();
        let subject = summary
            .dimensions
            .iter()
            .find(|entry| entry.dimension == Dimension::SubjectFocus)
            .unwrap_or_else(|| panic!("subject_focus summary missing: {summary:?}"));
        assert_eq!(subject.cohort_sizes, vec![12, 12, 12, 12]);
        // Default bounds call every 12-member cohort small and none large.
        assert_eq!(subject.small_cohorts, vec![0, 1, 2, 3]);
        assert!(subject.large_cohorts.is_empty());
        for entry in &summary.dimensions {
            assert_eq!(entry.cohort_sizes.len(), entry.k);
            assert_eq!(entry.cohort_sizes.iter().sum::<usize>(), 48);
        }

        let config = TrainingConfig {
            small_cohort: 10,
            large_cohort: 20,
            ..test_training_config()
        };
        let bundle = match ModelBundle::train(&mk_catalog(), &config, identity()) {
            Ok(bundle) => bundle,
            Err(err) => panic!("training should succeed: {err}"),
        };
        let summary = bundle.summary();
        let accessibility = summary
            .dimensions
            .iter()
            .find(|entry| entry.dimension == Dimension::Accessibility)
            .unwrap_or_else(|| panic!("accessibility summary missing: {summary:?}"));
        assert_eq!(accessibility.cohort_sizes, vec![24, 24]);
        assert!(accessibility.small_cohorts.is_empty());
        assert_eq!(accessibility.large_cohorts, vec![0, 1]);
    }

    #[test]
    fn duplicate_ids_and_version_drift_are_schema_errors() {
        let mut catalog = mk_catalog();
        catalog[1].resource_id = ResourceId(1);
        assert!(matches!(
            ModelBundle::train(&catalog, &test_training_config(), identity()),
            Err(PathwayError::Schema(_))
        ));

        let mut bundle = trained(&mk_catalog());
        assert!(bundle.check_versions().is_ok());
        bundle.metadata.mapping_table_version = "mapping.v0".to_string();
        assert!(matches!(bundle.check_versions(), Err(PathwayError::Schema(_))));
    }
}
