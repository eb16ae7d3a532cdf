//! Two-stage recommendation over a loaded model bundle.
//!
//! Stage 1 narrows the catalog to the cohorts nearest the profile in each dimension,
//! widening step by step until enough candidates remain. Stage 2 ranks candidates by
//! interest similarity (or cohort proximity when the profile has no usable interest
//! text) and, for low-budget profiles, guarantees a share of low-barrier results.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::bundle::ModelBundle;
use crate::config::EngineConfig;
use crate::dimension::{Dimension, DimensionMap};
use crate::encoder::EncodedProfile;
use crate::error::PathwayError;
use crate::profile::StudentProfile;
use crate::resource::{Resource, ResourceId};
use crate::similarity::SparseVector;
use crate::taxonomy::{CostCategory, FinancialSituation, OrdinalTier};

pub const TIE_BREAKERS: [&str; 3] = ["score_desc", "low_barrier_first", "resource_id_asc"];

const FLOOR_EPSILON: f64 = 1e-6;
const MAX_REASON_TERMS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationRequest {
    pub profile: StudentProfile,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    Strict,
    SubjectUnion,
    Widened,
    FullCatalog,
}

impl CandidateStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::SubjectUnion => "subject_union",
            Self::Widened => "widened",
            Self::FullCatalog => "full_catalog",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateStep {
    pub strategy: CandidateStrategy,
    /// Cohorts taken per dimension; zero for the full catalog.
    pub cohort_breadth: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateTrace {
    pub min_viable: usize,
    pub subject_filter_applied: bool,
    pub steps: Vec<CandidateStep>,
    pub selected: CandidateStrategy,
    pub candidate_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    Similarity,
    Proximity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdReport {
    pub mode: RankingMode,
    pub configured: f32,
    pub applied: f32,
    pub relaxed: bool,
    /// Candidates at or above the applied threshold.
    pub eligible: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FloorReport {
    pub applies: bool,
    pub floor: f32,
    pub required: usize,
    pub low_barrier_before: usize,
    pub low_barrier_after: usize,
    pub reranked: bool,
    /// Uniform score bonus given to low-barrier items when re-ranked.
    pub bonus: f32,
    /// Low-barrier items drawn from outside the eligible pool.
    pub supplemented: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuerySummary {
    pub matched_terms: Vec<String>,
    pub matched_subjects: Vec<String>,
    pub matched_formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeterminismMetadata {
    pub mapping_table_version: String,
    pub bundle_id: String,
    pub catalog_digest: String,
    pub training_seed: u64,
    pub tie_breakers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessibilitySummary {
    pub cost: String,
    pub financial_barrier: Option<String>,
    pub delivery_mode: Option<String>,
    pub transportation: Option<String>,
    pub rural_accessible: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSummary {
    pub resource_id: ResourceId,
    pub name: String,
    pub category: String,
    pub category_detail: String,
    pub subjects: Vec<String>,
    pub accessibility: AccessibilitySummary,
    pub target_grade: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationItem {
    pub rank: usize,
    pub resource: ResourceSummary,
    /// Raw interest cosine; zero in proximity mode.
    pub similarity: f32,
    /// Ordering score, non-increasing down the list.
    pub score: f32,
    pub cohorts: DimensionMap<usize>,
    pub low_barrier: bool,
    pub why: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationPackage {
    pub top_n: usize,
    pub items: Vec<RecommendationItem>,
    pub query: QuerySummary,
    pub candidates: CandidateTrace,
    pub threshold: ThresholdReport,
    pub floor: FloorReport,
    pub determinism: DeterminismMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarResource {
    pub resource: ResourceSummary,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    resource_id: ResourceId,
    similarity: f32,
    relevance: f32,
    low_barrier: bool,
}

#[derive(Debug, Clone, Copy)]
struct Placed {
    scored: Scored,
    score: f32,
    supplemented: bool,
}

/// Profile-side view of the trained cohorts for one request.
struct CohortView {
    /// Cohorts per dimension, nearest first.
    rankings: DimensionMap<Vec<usize>>,
    /// Distance from the profile to every centroid, indexed by cohort.
    distances: DimensionMap<Vec<f32>>,
}

/// Read-only state for serving: the catalog and the bundle trained on it.
#[derive(Debug)]
pub struct ServingContext {
    config: EngineConfig,
    bundle: ModelBundle,
    resources: BTreeMap<ResourceId, Resource>,
    cohorts: BTreeMap<ResourceId, DimensionMap<usize>>,
}

impl ServingContext {
    /// Bind a catalog to the bundle trained on it.
    ///
    /// # Errors
    /// Returns [`PathwayError::Validation`] for an invalid engine config and
    /// [`PathwayError::Schema`] when the bundle's versions drift or any resource
    /// lacks a cohort in some dimension.
    pub fn new(
        catalog: Vec<Resource>,
        bundle: ModelBundle,
        config: EngineConfig,
    ) -> Result<Self, PathwayError> {
        config.validate()?;
        bundle.check_versions()?;
        if catalog.len() != bundle.metadata.resource_count {
            return Err(PathwayError::Schema(format!(
                "bundle {} was trained on {} resources, catalog has {}",
                bundle.metadata.bundle_id,
                bundle.metadata.resource_count,
                catalog.len()
            )));
        }

        let mut resources = BTreeMap::new();
        let mut cohorts = BTreeMap::new();
        for resource in catalog {
            let resource_id = resource.resource_id;
            let assigned = DimensionMap::try_build(|dimension| {
                bundle.indexes.get(dimension).cohort_of(resource_id).ok_or_else(|| {
                    PathwayError::Schema(format!(
                        "resource {resource_id} has no {} cohort in bundle {}",
                        dimension.as_str(),
                        bundle.metadata.bundle_id
                    ))
                })
            })?;
            if resources.insert(resource_id, resource).is_some() {
                return Err(PathwayError::Schema(format!(
                    "catalog repeats resource_id {resource_id}"
                )));
            }
            cohorts.insert(resource_id, assigned);
        }

        tracing::info!(
            bundle_id = bundle.metadata.bundle_id.as_str(),
            resources = resources.len(),
            "serving context ready"
        );
        Ok(Self { config, bundle, resources, cohorts })
    }

    #[must_use]
    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog_len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn resource(&self, resource_id: ResourceId) -> Option<&Resource> {
        self.resources.get(&resource_id)
    }

    /// Recommend up to `top_n` resources for one profile.
    ///
    /// # Errors
    /// Returns [`PathwayError::Validation`] naming the violated profile field or
    /// `top_n`, and [`PathwayError::Dimension`] if the encoder and cohort models
    /// disagree on vector width.
    pub fn recommend(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationPackage, PathwayError> {
        let profile = &request.profile;
        profile.validate()?;
        let top_n = request.top_n.unwrap_or(self.config.default_top_n);
        if top_n == 0 || top_n > self.config.max_top_n {
            return Err(PathwayError::Validation(format!(
                "top_n MUST be in [1, {}], got {top_n}",
                self.config.max_top_n
            )));
        }

        let encoded = self.bundle.encoder.encode_profile(profile);
        let view = self.cohort_view(&encoded)?;
        let (candidates, trace) = self.select_candidates(&view, &encoded, top_n);

        let query = self.bundle.similarity.vectorize(&encoded.text);
        let mode = if query.is_empty() { RankingMode::Proximity } else { RankingMode::Similarity };
        let use_subject = encoded.has_subject_interest();
        let score_of =
            |resource_id: ResourceId| self.score(resource_id, &query, mode, &view, use_subject);

        let mut scored =
            candidates.iter().map(|resource_id| score_of(*resource_id)).collect::<Vec<_>>();
        scored.sort_by(rank_order);
        let (eligible, threshold) = self.apply_threshold(scored, mode, top_n);

        let selection_len = top_n.min(eligible.len());
        let (placed, floor) =
            self.apply_floor(profile.financial_situation, &eligible, selection_len, &score_of);

        let items = placed
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                self.package_item(index + 1, entry, mode, &query, &encoded, profile)
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            candidates = trace.candidate_count,
            strategy = trace.selected.as_str(),
            eligible = threshold.eligible,
            returned = items.len(),
            "recommendation complete"
        );

        Ok(RecommendationPackage {
            top_n,
            items,
            query: QuerySummary {
                matched_terms: self.bundle.similarity.matched_terms(&encoded.text),
                matched_subjects: encoded.matched_subjects.clone(),
                matched_formats: encoded.matched_formats.clone(),
            },
            candidates: trace,
            threshold,
            floor,
            determinism: DeterminismMetadata {
                mapping_table_version: self.bundle.metadata.mapping_table_version.clone(),
                bundle_id: self.bundle.metadata.bundle_id.clone(),
                catalog_digest: self.bundle.metadata.catalog_digest.clone(),
                training_seed: self.bundle.training_config.seed,
                tie_breakers: TIE_BREAKERS.iter().map(|rule| (*rule).to_string()).collect(),
            },
        })
    }

    /// Catalog neighbours of one resource by indexed text, best first.
    ///
    /// # Errors
    /// Returns [`PathwayError::Validation`] for an unknown `resource_id` or a
    /// `limit` outside `[1, max_top_n]`.
    pub fn similar_resources(
        &self,
        resource_id: ResourceId,
        limit: usize,
    ) -> Result<Vec<SimilarResource>, PathwayError> {
        if !self.resources.contains_key(&resource_id) {
            return Err(PathwayError::Validation(format!(
                "resource_id {resource_id} is not in the catalog"
            )));
        }
        if limit == 0 || limit > self.config.max_top_n {
            return Err(PathwayError::Validation(format!(
                "limit MUST be in [1, {}], got {limit}",
                self.config.max_top_n
            )));
        }
        let neighbours = self.bundle.similarity.similar_to(resource_id, limit, 0.0);
        Ok(neighbours
            .into_iter()
            .filter_map(|(other, similarity)| {
                let resource = self.resources.get(&other)?;
                Some(SimilarResource { resource: summarize(resource), similarity })
            })
            .collect())
    }

    fn cohort_view(&self, encoded: &EncodedProfile) -> Result<CohortView, PathwayError> {
        let nearest = DimensionMap::try_build(|dimension| {
            let index = self.bundle.indexes.get(dimension);
            index.assign_nearest(encoded.vectors.get(dimension), index.cohort_count())
        })?;

        let rankings =
            nearest.map(|_, entries| entries.iter().map(|entry| entry.cohort).collect());
        let distances = nearest.map(|dimension, entries| {
            let mut by_cohort =
                vec![f32::INFINITY; self.bundle.indexes.get(dimension).cohort_count()];
            for entry in entries {
                if let Some(slot) = by_cohort.get_mut(entry.cohort) {
                    *slot = entry.distance;
                }
            }
            by_cohort
        });
        Ok(CohortView { rankings, distances })
    }

    fn members_near(
        &self,
        view: &CohortView,
        dimension: Dimension,
        breadth: usize,
    ) -> BTreeSet<ResourceId> {
        let ranking = view.rankings.get(dimension);
        let cohorts = &ranking[..breadth.min(ranking.len())];
        self.bundle.indexes.get(dimension).members_of(cohorts)
    }

    fn union_at(&self, view: &CohortView, breadth: usize) -> BTreeSet<ResourceId> {
        let mut union = BTreeSet::new();
        for dimension in [Dimension::Accessibility, Dimension::Academic, Dimension::SubjectFocus] {
            union.extend(self.members_near(view, dimension, breadth));
        }
        union.retain(|resource_id| self.resources.contains_key(resource_id));
        union
    }

    /// Walk the fallback ladder until a step reaches the viable size.
    fn select_candidates(
        &self,
        view: &CohortView,
        encoded: &EncodedProfile,
        top_n: usize,
    ) -> (BTreeSet<ResourceId>, CandidateTrace) {
        let breadth = self.config.cohort_breadth;
        let min_viable = self.config.min_candidates.max(top_n).min(self.resources.len());
        let subject_filter_applied = encoded.has_subject_interest();
        let mut steps = Vec::new();

        let mut strict = self.members_near(view, Dimension::Accessibility, breadth);
        strict.extend(self.members_near(view, Dimension::Academic, breadth));
        if subject_filter_applied {
            let subject = self.members_near(view, Dimension::SubjectFocus, breadth);
            strict.retain(|resource_id| subject.contains(resource_id));
        }
        strict.retain(|resource_id| self.resources.contains_key(resource_id));

        let mut attempt =
            |strategy: CandidateStrategy, cohort_breadth: usize, set: &BTreeSet<ResourceId>| {
                steps.push(CandidateStep { strategy, cohort_breadth, size: set.len() });
                tracing::debug!(
                    strategy = strategy.as_str(),
                    cohort_breadth,
                    size = set.len(),
                    min_viable,
                    "candidate step"
                );
                set.len() >= min_viable
            };

        let mut chosen = None;
        if attempt(CandidateStrategy::Strict, breadth, &strict) {
            chosen = Some((CandidateStrategy::Strict, strict));
        } else {
            let union = self.union_at(view, breadth);
            if attempt(CandidateStrategy::SubjectUnion, breadth, &union) {
                chosen = Some((CandidateStrategy::SubjectUnion, union));
            } else {
                // Accessibility cohorts partition the catalog: a breadth covering all of
                // them is the full catalog step, so widening stops short of it.
                let covering = self.bundle.indexes.get(Dimension::Accessibility).cohort_count();
                let mut widened = breadth.saturating_mul(2);
                while widened < covering {
                    let set = self.union_at(view, widened);
                    if attempt(CandidateStrategy::Widened, widened, &set) {
                        chosen = Some((CandidateStrategy::Widened, set));
                        break;
                    }
                    widened = widened.saturating_mul(2);
                }
            }
        }

        let (selected, candidates) = chosen.unwrap_or_else(|| {
            let everything = self.resources.keys().copied().collect::<BTreeSet<_>>();
            attempt(CandidateStrategy::FullCatalog, 0, &everything);
            (CandidateStrategy::FullCatalog, everything)
        });
        if selected != CandidateStrategy::Strict {
            tracing::debug!(
                strategy = selected.as_str(),
                size = candidates.len(),
                "candidate fallback used"
            );
        }

        let trace = CandidateTrace {
            min_viable,
            subject_filter_applied,
            steps,
            selected,
            candidate_count: candidates.len(),
        };
        (candidates, trace)
    }

    fn score(
        &self,
        resource_id: ResourceId,
        query: &SparseVector,
        mode: RankingMode,
        view: &CohortView,
        use_subject: bool,
    ) -> Scored {
        let low_barrier = self.is_low_barrier(resource_id);
        match mode {
            RankingMode::Similarity => {
                let similarity = self.bundle.similarity.cosine(query, resource_id);
                Scored { resource_id, similarity, relevance: similarity, low_barrier }
            }
            RankingMode::Proximity => {
                let distance = self.proximity_distance(resource_id, view, use_subject);
                let relevance = 1.0 / (1.0 + distance);
                Scored { resource_id, similarity: 0.0, relevance, low_barrier }
            }
        }
    }

    /// Summed distance from the profile to the centroids of the resource's cohorts.
    fn proximity_distance(
        &self,
        resource_id: ResourceId,
        view: &CohortView,
        use_subject: bool,
    ) -> f32 {
        let Some(assigned) = self.cohorts.get(&resource_id) else {
            return f32::INFINITY;
        };
        Dimension::ALL
            .into_iter()
            .filter(|dimension| use_subject || *dimension != Dimension::SubjectFocus)
            .map(|dimension| {
                view.distances
                    .get(dimension)
                    .get(*assigned.get(dimension))
                    .copied()
                    .unwrap_or(f32::INFINITY)
            })
            .sum()
    }

    fn is_low_barrier(&self, resource_id: ResourceId) -> bool {
        self.cohorts
            .get(&resource_id)
            .is_some_and(|assigned| self.bundle.is_low_barrier(assigned.accessibility))
    }

    /// Keep candidates at or above the similarity threshold, relaxing it when fewer
    /// than `top_n` survive. Proximity ranking keeps every candidate.
    fn apply_threshold(
        &self,
        ranked: Vec<Scored>,
        mode: RankingMode,
        top_n: usize,
    ) -> (Vec<Scored>, ThresholdReport) {
        let configured = self.config.min_similarity;
        if mode == RankingMode::Proximity {
            let eligible = ranked.len();
            return (
                ranked,
                ThresholdReport { mode, configured, applied: 0.0, relaxed: false, eligible },
            );
        }

        let passing = ranked.iter().filter(|entry| entry.similarity >= configured).count();
        let (applied, relaxed) = if passing >= top_n || ranked.is_empty() {
            (configured, false)
        } else {
            let nth = ranked
                .get(top_n - 1)
                .or_else(|| ranked.last())
                .map_or(0.0, |entry| entry.similarity);
            (nth.min(configured).max(0.0), true)
        };
        if relaxed {
            tracing::debug!(configured, applied, "similarity threshold relaxed");
        }
        let eligible =
            ranked.into_iter().filter(|entry| entry.similarity >= applied).collect::<Vec<_>>();
        let report =
            ThresholdReport { mode, configured, applied, relaxed, eligible: eligible.len() };
        (eligible, report)
    }

    /// Guarantee low-budget profiles a minimum share of low-barrier results.
    ///
    /// When the plain top-`n` falls short, the best low-barrier items (eligible pool
    /// first, then the rest of the catalog) and the best remaining others are kept,
    /// and low-barrier items receive the smallest uniform bonus that puts the weakest
    /// kept one level with the strongest excluded other.
    fn apply_floor(
        &self,
        financial_situation: FinancialSituation,
        eligible: &[Scored],
        n: usize,
        score_of: &dyn Fn(ResourceId) -> Scored,
    ) -> (Vec<Placed>, FloorReport) {
        let floor = self.config.accessibility_floor;
        let applies = financial_situation == FinancialSituation::Low && n > 0 && floor > 0.0;
        let plain = eligible[..n]
            .iter()
            .map(|scored| Placed { scored: *scored, score: scored.relevance, supplemented: false })
            .collect::<Vec<_>>();
        let low_barrier_before = plain.iter().filter(|entry| entry.scored.low_barrier).count();
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let required = if applies {
            ((f64::from(floor) * n as f64 - FLOOR_EPSILON).ceil().max(0.0) as usize).min(n)
        } else {
            0
        };
        let mut report = FloorReport {
            applies,
            floor,
            required,
            low_barrier_before,
            low_barrier_after: low_barrier_before,
            reranked: false,
            bonus: 0.0,
            supplemented: 0,
        };
        if !applies || low_barrier_before >= required {
            return (plain, report);
        }

        let highs =
            eligible.iter().filter(|entry| !entry.low_barrier).copied().collect::<Vec<_>>();
        let wanted_lows = required.max(n.saturating_sub(highs.len()));
        let mut lows = eligible
            .iter()
            .filter(|entry| entry.low_barrier)
            .take(wanted_lows)
            .map(|scored| Placed { scored: *scored, score: scored.relevance, supplemented: false })
            .collect::<Vec<_>>();
        if lows.len() < wanted_lows {
            let in_pool = eligible.iter().map(|entry| entry.resource_id).collect::<BTreeSet<_>>();
            let mut outside = self
                .resources
                .keys()
                .filter(|resource_id| {
                    !in_pool.contains(resource_id) && self.is_low_barrier(**resource_id)
                })
                .map(|resource_id| score_of(*resource_id))
                .collect::<Vec<_>>();
            outside.sort_by(rank_order);
            let missing = wanted_lows - lows.len();
            lows.extend(outside.into_iter().take(missing).map(|scored| Placed {
                scored,
                score: scored.relevance,
                supplemented: true,
            }));
        }

        let kept_highs = n.saturating_sub(lows.len()).min(highs.len());
        let weakest_low =
            lows.iter().map(|entry| entry.scored.relevance).fold(f32::INFINITY, f32::min);
        let bonus = highs
            .get(kept_highs)
            .filter(|_| weakest_low.is_finite())
            .map_or(0.0, |excluded| (excluded.relevance - weakest_low).max(0.0));

        let mut placed = lows
            .into_iter()
            .map(|entry| Placed { score: entry.scored.relevance + bonus, ..entry })
            .chain(highs.into_iter().take(kept_highs).map(|scored| Placed {
                scored,
                score: scored.relevance,
                supplemented: false,
            }))
            .collect::<Vec<_>>();
        placed.sort_by(|lhs, rhs| {
            rhs.score
                .total_cmp(&lhs.score)
                .then_with(|| rhs.scored.low_barrier.cmp(&lhs.scored.low_barrier))
                .then_with(|| lhs.scored.resource_id.cmp(&rhs.scored.resource_id))
        });

        report.reranked = true;
        report.bonus = bonus;
        report.low_barrier_after = placed.iter().filter(|entry| entry.scored.low_barrier).count();
        report.supplemented = placed.iter().filter(|entry| entry.supplemented).count();
        tracing::info!(
            required,
            before = low_barrier_before,
            after = report.low_barrier_after,
            bonus,
            supplemented = report.supplemented,
            "accessibility floor re-ranked results"
        );
        (placed, report)
    }

    fn package_item(
        &self,
        rank: usize,
        entry: &Placed,
        mode: RankingMode,
        query: &SparseVector,
        encoded: &EncodedProfile,
        profile: &StudentProfile,
    ) -> Option<RecommendationItem> {
        let resource_id = entry.scored.resource_id;
        let resource = self.resources.get(&resource_id)?;
        let cohorts = self.cohorts.get(&resource_id)?.clone();

        let mut why = Vec::new();
        match mode {
            RankingMode::Similarity => {
                let terms = self.bundle.similarity.shared_terms(query, resource_id);
                if !terms.is_empty() {
                    let shown = terms.into_iter().take(MAX_REASON_TERMS).collect::<Vec<_>>();
                    why.push(format!("matches interests: {}", shown.join(", ")));
                }
            }
            RankingMode::Proximity => {
                why.push(format!(
                    "close to the profile's cohorts (relevance {:.2})",
                    entry.scored.relevance
                ));
            }
        }
        if let Some(subject) = resource.subjects.iter().find(|tag| {
            encoded.matched_subjects.iter().any(|wanted| wanted == &tag.tier1.trim().to_lowercase())
        }) {
            why.push(format!("covers requested subject {}", subject.tier1));
        }
        let category = resource.category.tier1.trim().to_lowercase();
        if encoded.matched_formats.iter().any(|wanted| wanted == &category) {
            why.push(format!("offered as {}", resource.category.tier1));
        }
        if entry.scored.low_barrier {
            let cost = resource.accessibility.cost_category.unwrap_or(CostCategory::DEFAULT);
            why.push(format!("low financial barrier ({})", cost.display_label()));
        }
        if entry.supplemented {
            why.push("included to meet the accessibility floor".to_string());
        }
        if let Some(range) = resource.academic.target_grade {
            if range.admits(f32::from(profile.grade_level), self.config.grade_tolerance) {
                why.push(format!(
                    "suited to grade {} (targets {})",
                    profile.grade_level,
                    range.label()
                ));
            } else {
                why.push(format!("targets grades {}", range.label()));
            }
        }

        Some(RecommendationItem {
            rank,
            resource: summarize(resource),
            similarity: entry.scored.similarity,
            score: entry.score,
            cohorts,
            low_barrier: entry.scored.low_barrier,
            why,
        })
    }
}

fn rank_order(lhs: &Scored, rhs: &Scored) -> std::cmp::Ordering {
    rhs.relevance
        .total_cmp(&lhs.relevance)
        .then_with(|| lhs.resource_id.cmp(&rhs.resource_id))
}

fn summarize(resource: &Resource) -> ResourceSummary {
    let accessibility = &resource.accessibility;
    ResourceSummary {
        resource_id: resource.resource_id,
        name: resource.name.clone(),
        category: resource.category.tier1.clone(),
        category_detail: resource.category.tier2.clone(),
        subjects: resource
            .subjects
            .iter()
            .map(|tag| match &tag.tier2 {
                Some(tier2) => format!("{} / {tier2}", tag.tier1),
                None => tag.tier1.clone(),
            })
            .collect(),
        accessibility: AccessibilitySummary {
            cost: accessibility
                .cost_category
                .map_or_else(|| "Unknown".to_string(), |cost| cost.display_label().to_string()),
            financial_barrier: accessibility
                .financial_barrier
                .value
                .map(|tier| tier.as_str().to_string()),
            delivery_mode: accessibility.delivery_mode.map(|mode| mode.as_str().to_string()),
            transportation: accessibility.transportation.map(|tier| tier.as_str().to_string()),
            rural_accessible: accessibility.rural_accessible,
        },
        target_grade: resource.academic.target_grade.map(|range| range.label()),
        url: resource.url.clone(),
    }
}
