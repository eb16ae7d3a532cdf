use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::engine::{CandidateStrategy, RecommendationRequest, ServingContext};
use crate::error::PathwayError;
use crate::profile::StudentProfile;
use crate::resource::ResourceId;
use crate::taxonomy::FinancialSituation;

/// Distinct categories and subjects a result list needs to count as diverse.
pub const DIVERSE_CATEGORIES: usize = 3;
pub const DIVERSE_SUBJECTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileEvaluation {
    pub profile_index: usize,
    pub financial_situation: FinancialSituation,
    pub returned: usize,
    pub selected_strategy: CandidateStrategy,
    pub unique_categories: usize,
    pub unique_subjects: usize,
    pub diverse: bool,
    pub low_barrier_share: f32,
    /// Share of results whose delivery mode equals the profile's location preference.
    pub location_match_share: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub bundle_id: String,
    pub top_n: usize,
    pub profile_count: usize,
    pub catalog_size: usize,
    pub unique_recommended: usize,
    /// `unique_recommended / catalog_size`.
    pub coverage: f32,
    pub mean_unique_categories: f32,
    pub mean_unique_subjects: f32,
    pub diverse_profiles: usize,
    pub low_financial_profiles: usize,
    /// Low-financial profiles whose low-barrier share reaches the accessibility floor.
    pub low_financial_meeting_floor: usize,
    pub mean_location_match: f32,
    pub profiles: Vec<ProfileEvaluation>,
}

impl ServingContext {
    /// Run every profile through [`ServingContext::recommend`] and summarize how
    /// varied, accessible and location-aligned the results are.
    ///
    /// # Errors
    /// Returns [`PathwayError::Validation`] for an empty profile list, and the
    /// first failing profile's error prefixed with its position.
    pub fn evaluate(
        &self,
        profiles: &[StudentProfile],
        top_n: Option<usize>,
    ) -> Result<EvaluationReport, PathwayError> {
        if profiles.is_empty() {
            return Err(PathwayError::Validation(
                "profiles MUST contain at least one profile".to_string(),
            ));
        }

        let floor = self.config().accessibility_floor;
        let mut recommended = BTreeSet::<ResourceId>::new();
        let mut evaluations = Vec::with_capacity(profiles.len());
        let mut resolved_top_n = 0;
        for (profile_index, profile) in profiles.iter().enumerate() {
            let request = RecommendationRequest { profile: profile.clone(), top_n };
            let package = self.recommend(&request).map_err(|err| at_index(profile_index, err))?;
            resolved_top_n = package.top_n;

            let mut categories = BTreeSet::new();
            let mut subjects = BTreeSet::new();
            let mut low_barrier = 0_usize;
            let mut location_matches = 0_usize;
            for item in &package.items {
                let resource_id = item.resource.resource_id;
                recommended.insert(resource_id);
                categories.insert(item.resource.category.as_str());
                subjects.extend(item.resource.subjects.iter().map(String::as_str));
                if item.low_barrier {
                    low_barrier += 1;
                }
                let delivery = self
                    .resource(resource_id)
                    .and_then(|resource| resource.accessibility.delivery_mode);
                if delivery == Some(profile.location_preference) {
                    location_matches += 1;
                }
            }

            let returned = package.items.len();
            evaluations.push(ProfileEvaluation {
                profile_index,
                financial_situation: profile.financial_situation,
                returned,
                selected_strategy: package.candidates.selected,
                unique_categories: categories.len(),
                unique_subjects: subjects.len(),
                diverse: categories.len() >= DIVERSE_CATEGORIES
                    && subjects.len() >= DIVERSE_SUBJECTS,
                low_barrier_share: share(low_barrier, returned),
                location_match_share: share(location_matches, returned),
            });
        }

        let low_financial = evaluations
            .iter()
            .filter(|entry| entry.financial_situation == FinancialSituation::Low)
            .collect::<Vec<_>>();
        let report = EvaluationReport {
            bundle_id: self.bundle().metadata.bundle_id.clone(),
            top_n: resolved_top_n,
            profile_count: evaluations.len(),
            catalog_size: self.catalog_len(),
            unique_recommended: recommended.len(),
            coverage: share(recommended.len(), self.catalog_len()),
            mean_unique_categories: mean(evaluations.iter().map(|entry| entry.unique_categories)),
            mean_unique_subjects: mean(evaluations.iter().map(|entry| entry.unique_subjects)),
            diverse_profiles: evaluations.iter().filter(|entry| entry.diverse).count(),
            low_financial_profiles: low_financial.len(),
            low_financial_meeting_floor: low_financial
                .iter()
                .filter(|entry| entry.returned > 0 && entry.low_barrier_share >= floor)
                .count(),
            mean_location_match: evaluations
                .iter()
                .map(|entry| entry.location_match_share)
                .sum::<f32>()
                / len_f32(evaluations.len()),
            profiles: evaluations,
        };
        tracing::info!(
            profiles = report.profile_count,
            coverage = report.coverage,
            diverse = report.diverse_profiles,
            "evaluation complete"
        );
        Ok(report)
    }
}

fn at_index(profile_index: usize, err: PathwayError) -> PathwayError {
    match err {
        PathwayError::Validation(message) => {
            PathwayError::Validation(format!("profiles[{profile_index}]: {message}"))
        }
        other => other,
    }
}

fn share(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        return 0.0;
    }
    len_f32(part) / len_f32(whole)
}

fn mean(values: impl Iterator<Item = usize>) -> f32 {
    let (total, count) = values.fold((0, 0), |(total, count), value| (total + value, count + 1));
    share(total, count)
}

#[allow(clippy::cast_precision_loss)]
fn len_f32(value: usize) -> f32 {
    value as f32
}
