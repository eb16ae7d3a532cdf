use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::dimension::Dimension;
use crate::error::PathwayError;
use crate::resource::ResourceId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CohortDistance {
    pub cohort: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KCandidateScore {
    pub k: usize,
    /// Cohorts left after empty clusters were dropped.
    pub effective_k: usize,
    pub silhouette: f32,
    pub inertia: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterQuality {
    pub k: usize,
    pub silhouette: f32,
    pub davies_bouldin: f32,
    pub inertia: f32,
    pub training_rows: usize,
    pub candidates: Vec<KCandidateScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterIndex {
    pub dimension: Dimension,
    pub width: usize,
    pub centroids: Vec<Vec<f32>>,
    pub assignments: BTreeMap<ResourceId, usize>,
    pub quality: ClusterQuality,
}

struct KMeansFit {
    centroids: Vec<Vec<f32>>,
    labels: Vec<usize>,
    inertia: f64,
}

impl ClusterIndex {
    /// Train one dimension's cohorts, choosing K by silhouette over the configured range.
    ///
    /// # Errors
    /// Returns [`PathwayError::Dimension`] when rows disagree on width, and
    /// [`PathwayError::Quality`] when there are too few rows for the K range or no K
    /// reaches `min_silhouette`.
    pub fn train(
        dimension: Dimension,
        rows: &[(ResourceId, Vec<f32>)],
        config: &TrainingConfig,
    ) -> Result<Self, PathwayError> {
        let width = rows.first().map_or(0, |(_, vector)| vector.len());
        if let Some((resource_id, vector)) = rows.iter().find(|(_, vector)| vector.len() != width)
        {
            return Err(PathwayError::Dimension(format!(
                "{} row for resource {resource_id} has width {}, expected {width}",
                dimension.as_str(),
                vector.len()
            )));
        }

        let range = config.k_ranges.get(dimension);
        let k_max = range.max.min(rows.len().saturating_sub(1));
        if k_max < range.min {
            return Err(PathwayError::Quality(format!(
                "{} needs more than {} training rows for K >= {}, got {}",
                dimension.as_str(),
                range.min,
                range.min,
                rows.len()
            )));
        }

        let points = rows.iter().map(|(_, vector)| vector.as_slice()).collect::<Vec<_>>();
        let sample = sample_indexes(points.len(), config.silhouette_sample);

        let mut candidates = Vec::new();
        let mut best: Option<(f32, KMeansFit)> = None;
        for k in range.min..=k_max {
            let fit = best_of_restarts(&points, k, config);
            let silhouette = silhouette_score(&points, &fit.labels, &sample);
            #[allow(clippy::cast_possible_truncation)]
            let inertia = fit.inertia as f32;
            tracing::debug!(
                dimension = dimension.as_str(),
                k,
                effective_k = fit.centroids.len(),
                silhouette,
                inertia,
                "evaluated cohort count"
            );
            candidates.push(KCandidateScore {
                k,
                effective_k: fit.centroids.len(),
                silhouette,
                inertia,
            });
            let improves = best.as_ref().map_or(true, |(score, _)| silhouette > *score);
            if improves {
                best = Some((silhouette, fit));
            }
        }

        let Some((silhouette, fit)) = best else {
            return Err(PathwayError::Quality(format!(
                "{} produced no clustering candidates",
                dimension.as_str()
            )));
        };
        if silhouette < config.min_silhouette {
            return Err(PathwayError::Quality(format!(
                "{} best silhouette {silhouette:.4} is below the floor {:.4}",
                dimension.as_str(),
                config.min_silhouette
            )));
        }

        let davies_bouldin = davies_bouldin_index(&points, &fit.labels, &fit.centroids);
        #[allow(clippy::cast_possible_truncation)]
        let inertia = fit.inertia as f32;
        tracing::info!(
            dimension = dimension.as_str(),
            k = fit.centroids.len(),
            silhouette,
            davies_bouldin,
            "trained cohort model"
        );

        let assignments = rows
            .iter()
            .zip(&fit.labels)
            .map(|((resource_id, _), label)| (*resource_id, *label))
            .collect();

        Ok(Self {
            dimension,
            width,
            quality: ClusterQuality {
                k: fit.centroids.len(),
                silhouette,
                davies_bouldin,
                inertia,
                training_rows: rows.len(),
                candidates,
            },
            centroids: fit.centroids,
            assignments,
        })
    }

    #[must_use]
    pub fn cohort_count(&self) -> usize {
        self.centroids.len()
    }

    /// Member count per cohort, indexed by cohort.
    #[must_use]
    pub fn cohort_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.cohort_count()];
        for cohort in self.assignments.values() {
            if let Some(size) = sizes.get_mut(*cohort) {
                *size += 1;
            }
        }
        sizes
    }

    #[must_use]
    pub fn cohort_of(&self, resource_id: ResourceId) -> Option<usize> {
        self.assignments.get(&resource_id).copied()
    }

    #[must_use]
    pub fn centroid(&self, cohort: usize) -> Option<&[f32]> {
        self.centroids.get(cohort).map(Vec::as_slice)
    }

    /// Members of one cohort in ascending id order.
    #[must_use]
    pub fn members(&self, cohort: usize) -> Vec<ResourceId> {
        self.assignments
            .iter()
            .filter(|(_, assigned)| **assigned == cohort)
            .map(|(resource_id, _)| *resource_id)
            .collect()
    }

    /// Union of the members of several cohorts.
    #[must_use]
    pub fn members_of(&self, cohorts: &[usize]) -> BTreeSet<ResourceId> {
        let wanted = cohorts.iter().copied().collect::<BTreeSet<_>>();
        self.assignments
            .iter()
            .filter(|(_, assigned)| wanted.contains(assigned))
            .map(|(resource_id, _)| *resource_id)
            .collect()
    }

    /// Distance to every centroid, closest `k` first, ties by ascending cohort id.
    ///
    /// # Errors
    /// Returns [`PathwayError::Dimension`] when `query` has the wrong width.
    pub fn assign_nearest(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<CohortDistance>, PathwayError> {
        self.check_width(query)?;
        let mut distances = self
            .centroids
            .iter()
            .enumerate()
            .map(|(cohort, centroid)| CohortDistance {
                cohort,
                distance: squared_distance(query, centroid).sqrt(),
            })
            .collect::<Vec<_>>();
        distances.sort_by(|lhs, rhs| {
            lhs.distance.total_cmp(&rhs.distance).then_with(|| lhs.cohort.cmp(&rhs.cohort))
        });
        distances.truncate(k);
        Ok(distances)
    }

    /// Place a resource that was held out of training in its nearest cohort.
    ///
    /// # Errors
    /// Returns [`PathwayError::Dimension`] when `vector` has the wrong width.
    pub fn assign(
        &mut self,
        resource_id: ResourceId,
        vector: &[f32],
    ) -> Result<usize, PathwayError> {
        let nearest = self.assign_nearest(vector, 1)?;
        let Some(closest) = nearest.first() else {
            return Err(PathwayError::Schema(format!(
                "{} cohort model has no centroids",
                self.dimension.as_str()
            )));
        };
        self.assignments.insert(resource_id, closest.cohort);
        Ok(closest.cohort)
    }

    fn check_width(&self, vector: &[f32]) -> Result<(), PathwayError> {
        if vector.len() != self.width {
            return Err(PathwayError::Dimension(format!(
                "{} query has width {}, expected {}",
                self.dimension.as_str(),
                vector.len(),
                self.width
            )));
        }
        Ok(())
    }
}

#[must_use]
fn squared_distance(lhs: &[f32], rhs: &[f32]) -> f32 {
    lhs.iter().zip(rhs).map(|(a, b)| (a - b) * (a - b)).sum()
}

fn distance(lhs: &[f32], rhs: &[f32]) -> f64 {
    f64::from(squared_distance(lhs, rhs)).sqrt()
}

fn sample_indexes(total: usize, limit: usize) -> Vec<usize> {
    if total <= limit {
        return (0..total).collect();
    }
    (0..limit).map(|index| index * total / limit).collect()
}

fn best_of_restarts(points: &[&[f32]], k: usize, config: &TrainingConfig) -> KMeansFit {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(k as u64));
    let mut best: Option<KMeansFit> = None;
    for _ in 0..config.n_init {
        let fit = lloyd(points, seed_centroids(points, k, &mut rng), config);
        if best.as_ref().map_or(true, |current| fit.inertia < current.inertia) {
            best = Some(fit);
        }
    }
    let fit = best.unwrap_or_else(|| lloyd(points, seed_centroids(points, k, &mut rng), config));
    compact(fit)
}

/// k-means++ seeding. When every remaining point coincides with a chosen centroid,
/// the lowest unchosen index is taken.
fn seed_centroids(points: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let first = rng.gen_range(0..points.len());
    let mut chosen = vec![first];
    let mut nearest = points
        .iter()
        .map(|point| f64::from(squared_distance(point, points[first])))
        .collect::<Vec<_>>();

    while chosen.len() < k.min(points.len()) {
        let total = nearest.iter().sum::<f64>();
        let next = if total <= f64::EPSILON {
            (0..points.len()).find(|index| !chosen.contains(index)).unwrap_or(0)
        } else {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut picked = None;
            for (index, weight) in nearest.iter().enumerate() {
                if *weight <= 0.0 {
                    continue;
                }
                cumulative += weight;
                picked = Some(index);
                if cumulative >= target {
                    break;
                }
            }
            picked.unwrap_or(0)
        };
        chosen.push(next);
        for (index, point) in points.iter().enumerate() {
            let candidate = f64::from(squared_distance(point, points[next]));
            if candidate < nearest[index] {
                nearest[index] = candidate;
            }
        }
    }

    chosen.into_iter().map(|index| points[index].to_vec()).collect()
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (index, centroid) in centroids.iter().enumerate() {
        let candidate = squared_distance(point, centroid);
        if candidate < best.1 {
            best = (index, candidate);
        }
    }
    best
}

fn lloyd(points: &[&[f32]], mut centroids: Vec<Vec<f32>>, config: &TrainingConfig) -> KMeansFit {
    let width = points.first().map_or(0, |point| point.len());
    let mut labels = vec![0; points.len()];

    for _ in 0..config.max_iterations {
        for (label, point) in labels.iter_mut().zip(points) {
            *label = nearest_centroid(point, &centroids).0;
        }

        let mut sums = vec![vec![0.0_f64; width]; centroids.len()];
        let mut counts = vec![0_usize; centroids.len()];
        for (label, point) in labels.iter().zip(points) {
            counts[*label] += 1;
            for (sum, value) in sums[*label].iter_mut().zip(point.iter()) {
                *sum += f64::from(*value);
            }
        }

        let mut shift = 0.0_f32;
        for (cohort, centroid) in centroids.iter_mut().enumerate() {
            if counts[cohort] == 0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let updated = sums[cohort]
                .iter()
                .map(|sum| (sum / counts[cohort] as f64) as f32)
                .collect::<Vec<_>>();
            shift = shift.max(squared_distance(centroid, &updated));
            *centroid = updated;
        }
        if shift <= config.tolerance {
            break;
        }
    }

    let mut inertia = 0.0_f64;
    for (label, point) in labels.iter_mut().zip(points) {
        let (cohort, squared) = nearest_centroid(point, &centroids);
        *label = cohort;
        inertia += f64::from(squared);
    }
    KMeansFit { centroids, labels, inertia }
}

/// Drop clusters with no members so cohort ids stay dense.
fn compact(fit: KMeansFit) -> KMeansFit {
    let used = fit.labels.iter().copied().collect::<BTreeSet<_>>();
    if used.len() == fit.centroids.len() {
        return fit;
    }
    let remap = used.iter().enumerate().map(|(new, old)| (*old, new)).collect::<BTreeMap<_, _>>();
    let centroids = fit
        .centroids
        .into_iter()
        .enumerate()
        .filter(|(index, _)| used.contains(index))
        .map(|(_, centroid)| centroid)
        .collect();
    let labels = fit.labels.iter().map(|label| remap.get(label).copied().unwrap_or(0)).collect();
    KMeansFit { centroids, labels, inertia: fit.inertia }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn silhouette_score(points: &[&[f32]], labels: &[usize], sample: &[usize]) -> f32 {
    let cohorts = sample.iter().map(|index| labels[*index]).collect::<BTreeSet<_>>();
    if cohorts.len() < 2 {
        return 0.0;
    }
    let cohort_count = cohorts.iter().max().map_or(0, |max| max + 1);

    let mut total = 0.0_f64;
    for &index in sample {
        let mut sums = vec![0.0_f64; cohort_count];
        let mut counts = vec![0_usize; cohort_count];
        for &other in sample {
            if other == index {
                continue;
            }
            sums[labels[other]] += distance(points[index], points[other]);
            counts[labels[other]] += 1;
        }

        let own = labels[index];
        if counts[own] == 0 {
            continue;
        }
        let intra = sums[own] / counts[own] as f64;
        let inter = (0..cohort_count)
            .filter(|cohort| *cohort != own && counts[*cohort] > 0)
            .map(|cohort| sums[cohort] / counts[cohort] as f64)
            .fold(f64::INFINITY, f64::min);
        let denominator = intra.max(inter);
        if denominator > 0.0 && inter.is_finite() {
            total += (inter - intra) / denominator;
        }
    }
    (total / sample.len() as f64) as f32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn davies_bouldin_index(points: &[&[f32]], labels: &[usize], centroids: &[Vec<f32>]) -> f32 {
    if centroids.len() < 2 {
        return 0.0;
    }
    let mut spread = vec![0.0_f64; centroids.len()];
    let mut counts = vec![0_usize; centroids.len()];
    for (label, point) in labels.iter().zip(points) {
        spread[*label] += distance(point, &centroids[*label]);
        counts[*label] += 1;
    }
    for (value, count) in spread.iter_mut().zip(&counts) {
        if *count > 0 {
            *value /= *count as f64;
        }
    }

    let mut total = 0.0_f64;
    for i in 0..centroids.len() {
        let mut worst = 0.0_f64;
        for j in 0..centroids.len() {
            if i == j {
                continue;
            }
            let separation = distance(&centroids[i], &centroids[j]);
            if separation > 0.0 {
                worst = worst.max((spread[i] + spread[j]) / separation);
            }
        }
        total += worst;
    }
    (total / centroids.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KRange;
    use crate::dimension::DimensionMap;

    fn blob_rows() -> Vec<(ResourceId, Vec<f32>)> {
        let centers = [[0.0_f32, 0.0], [10.0, 0.0], [0.0, 10.0]];
        let offsets = [[0.0_f32, 0.0], [0.3, 0.1], [-0.2, 0.2], [0.1, -0.3], [-0.1, -0.1]];
        let mut rows = Vec::new();
        let mut id = 1;
        for center in centers {
            for offset in offsets {
                rows.push((ResourceId(id), vec![center[0] + offset[0], center[1] + offset[1]]));
                id += 1;
            }
        }
        rows
    }

    fn config_with_range(min: usize, max: usize) -> TrainingConfig {
        let range = KRange::new(min, max);
        TrainingConfig {
            n_init: 4,
            k_ranges: DimensionMap {
                accessibility: range,
                academic: range,
                subject_focus: range,
                format: range,
            },
            ..TrainingConfig::default()
        }
    }

    fn trained(rows: &[(ResourceId, Vec<f32>)], config: &TrainingConfig) -> ClusterIndex {
        match ClusterIndex::train(Dimension::Academic, rows, config) {
            Ok(index) => index,
            Err(err) => panic!("training should succeed: {err}"),
        }
    }

    // Test IDs: TCLU-001
    #[test]
    fn silhouette_selects_the_natural_cluster_count() {
        let index = trained(&blob_rows(), &config_with_range(2, 6));
        assert_eq!(index.cohort_count(), 3);
        assert!(index.quality.silhouette > 0.9);
        assert!(index.quality.davies_bouldin < 0.2);
        assert_eq!(index.quality.candidates.len(), 5);
        assert_eq!(index.assignments.len(), 15);
    }

    // Test IDs: TCLU-002
    #[test]
    fn cohort_ids_are_dense_and_every_cohort_is_non_empty() {
        let index = trained(&blob_rows(), &config_with_range(2, 6));
        for cohort in 0..index.cohort_count() {
            assert!(!index.members(cohort).is_empty(), "cohort {cohort} is empty");
        }
        assert!(index.assignments.values().all(|cohort| *cohort < index.cohort_count()));
    }

    // Test IDs: TCLU-003
    #[test]
    fn training_is_deterministic_for_a_fixed_seed() {
        let config = config_with_range(2, 6);
        let first = trained(&blob_rows(), &config);
        let second = trained(&blob_rows(), &config);
        assert_eq!(first, second);
    }

    // Test IDs: TCLU-004
    #[test]
    fn quality_floor_failure_is_loud() {
        let rows = (0..12_u32)
            .map(|id| {
                #[allow(clippy::cast_precision_loss)]
                let x = id as f32;
                (ResourceId(id), vec![x, 0.0])
            })
            .collect::<Vec<_>>();
        let config = TrainingConfig { min_silhouette: 0.99, ..config_with_range(2, 4) };
        match ClusterIndex::train(Dimension::Format, &rows, &config) {
            Err(PathwayError::Quality(message)) => {
                assert!(message.contains("format"), "{message}");
                assert!(message.contains("below the floor"), "{message}");
            }
            other => panic!("expected quality error, got {other:?}"),
        }
    }

    // Test IDs: TCLU-005
    #[test]
    fn too_few_rows_for_the_k_range_is_a_quality_error() {
        let rows = vec![(ResourceId(1), vec![0.0]), (ResourceId(2), vec![1.0])];
        assert!(matches!(
            ClusterIndex::train(Dimension::Academic, &rows, &config_with_range(2, 4)),
            Err(PathwayError::Quality(_))
        ));
    }

    // Test IDs: TCLU-006
    #[test]
    fn assign_nearest_orders_by_distance_then_cohort_id() {
        let index = trained(&blob_rows(), &config_with_range(3, 3));
        let nearest = match index.assign_nearest(&[9.0, 0.0], 2) {
            Ok(nearest) => nearest,
            Err(err) => panic!("query should succeed: {err}"),
        };
        assert_eq!(nearest.len(), 2);
        assert!(nearest[0].distance <= nearest[1].distance);
        let expected = index.cohort_of(ResourceId(6)).unwrap_or_else(|| panic!("id 6 assigned"));
        assert_eq!(nearest[0].cohort, expected);

        // Equidistant from the (0,0) and (10,0) blobs: the lower cohort id wins the tie.
        let mut tied = index.clone();
        tied.centroids = vec![vec![0.0, 0.0], vec![10.0, 0.0], vec![0.0, 10.0]];
        let nearest = match tied.assign_nearest(&[5.0, 0.0], 3) {
            Ok(nearest) => nearest,
            Err(err) => panic!("query should succeed: {err}"),
        };
        assert_eq!(nearest[0].cohort, 0);
        assert_eq!(nearest[1].cohort, 1);
    }

    // Test IDs: TCLU-007
    #[test]
    fn dimensionality_mismatch_is_rejected() {
        let index = trained(&blob_rows(), &config_with_range(3, 3));
        assert!(matches!(
            index.assign_nearest(&[1.0, 2.0, 3.0], 1),
            Err(PathwayError::Dimension(_))
        ));

        let mut rows = blob_rows();
        rows[3].1.push(1.0);
        assert!(matches!(
            ClusterIndex::train(Dimension::Academic, &rows, &config_with_range(2, 4)),
            Err(PathwayError::Dimension(_))
        ));
    }

    #[test]
    fn held_out_rows_join_their_nearest_cohort() {
        let mut index = trained(&blob_rows(), &config_with_range(3, 3));
        let cohort = match index.assign(ResourceId(99), &[0.0, 9.5]) {
            Ok(cohort) => cohort,
            Err(err) => panic!("assign should succeed: {err}"),
        };
        assert_eq!(Some(cohort), index.cohort_of(ResourceId(11)));
        assert!(index.members(cohort).contains(&ResourceId(99)));
    }

    #[test]
    fn duplicate_points_compact_surplus_clusters() {
        let rows = (0..10_u32)
            .map(|id| (ResourceId(id), if id < 5 { vec![0.0, 0.0] } else { vec![4.0, 4.0] }))
            .collect::<Vec<_>>();
        let index = trained(&rows, &config_with_range(2, 5));
        assert_eq!(index.cohort_count(), 2);
        assert!((index.quality.silhouette - 1.0).abs() < 1e-6);
        assert!(index.quality.candidates.iter().all(|candidate| candidate.effective_k <= 2
            || candidate.k == candidate.effective_k));
    }

    #[test]
    fn stride_sample_is_bounded() {
        assert_eq!(sample_indexes(5, 10), vec![0, 1, 2, 3, 4]);
        assert_eq!(sample_indexes(10, 4), vec![0, 2, 5, 7]);
    }
}
