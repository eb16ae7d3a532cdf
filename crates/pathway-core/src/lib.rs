//! Domain logic for matching student profiles to educational resources.

mod bundle;
mod cluster;
mod config;
mod dimension;
mod encoder;
mod engine;
mod error;
mod evaluation;
mod profile;
mod resource;
mod similarity;
mod taxonomy;

#[cfg(test)]
pub(crate) mod fixtures;

pub use bundle::{
    BundleIdentity, BundleMetadata, DimensionSummary, ModelBundle, TrainingSummary,
    BUNDLE_FORMAT_VERSION,
};
pub use cluster::{ClusterIndex, ClusterQuality, CohortDistance, KCandidateScore};
pub use config::{EngineConfig, KRange, SimilarityConfig, TrainingConfig};
pub use dimension::{Dimension, DimensionMap};
pub use encoder::{
    ColumnScaler, EncodedProfile, EncodedResource, EncoderOptions, FeatureEncoder,
    ACADEMIC_FEATURES, ACCESSIBILITY_FEATURES, FORMAT_NUMERIC_FEATURES,
};
pub use engine::{
    AccessibilitySummary, CandidateStep, CandidateStrategy, CandidateTrace, DeterminismMetadata,
    FloorReport, QuerySummary, RankingMode, RecommendationItem, RecommendationPackage,
    RecommendationRequest, ResourceSummary, ServingContext, SimilarResource, ThresholdReport,
    TIE_BREAKERS,
};
pub use error::PathwayError;
pub use evaluation::{
    EvaluationReport, ProfileEvaluation, DIVERSE_CATEGORIES, DIVERSE_SUBJECTS,
};
pub use profile::{
    StudentProfile, MAX_FORMAT_PREFERENCES, MAX_GRADE_LEVEL, MAX_INTEREST_CHARS,
    MAX_SUBJECT_AREAS, MAX_WEEKLY_HOURS,
};
pub use resource::{
    parse_weekly_hours, AcademicAttributes, AccessibilityAttributes, Category, FormatAttributes,
    GradeRange, Predicted, ReliabilityFlag, Resource, ResourceId, SubjectTag,
    DEFAULT_GRADE_MIDPOINT, DEFAULT_WEEKLY_HOURS, HIGH_CONFIDENCE_THRESHOLD,
};
pub use similarity::{extract_terms, tokenize, SimilarityIndex, SparseVector};
pub use taxonomy::{
    mapping_table, normalize_label, AcademicLevel, Connectivity, CostCategory, DeliveryMode,
    FinancialBarrier, FinancialSituation, HiddenCosts, MappingEntry, OrdinalTier,
    PrerequisiteLevel, StructureType, SupportLevel, Transportation, MAPPING_TABLE_VERSION,
};
