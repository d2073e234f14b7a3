//! Representative-period (typical day) aggregation.
//!
//! ```text
//!   full horizon (days)         clusters            representative steps
//!   d0 d1 d2 d3 d4 d5 ...  ──►  {d0,d2,d5} ──► medoid d2 ──► r[0 .. p)
//!                               {d1,d3,d4} ──► medoid d3 ──► r[p .. 2p)
//! ```
//!
//! Every full-resolution step `t = d * p + h` maps to representative step
//! `rank(cluster(d)) * p + h`. A representative step's weight is the number
//! of full steps it stands for, so weights always sum to the horizon length.
//!
//! Clustering is k-means over min-max normalised daily profiles of every
//! series in the store, initialised with k-means++ from a seeded RNG so the
//! mapping is reproducible. Each cluster is represented by its medoid (an
//! actual day, never an average) and clusters are ranked by first
//! occurrence.

use ehub_core::{AggregationConfig, AggregationError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::store::TimeSeriesStore;

/// Mapping between full-resolution and representative time steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepresentativeMapping {
    /// `order[t_full]` is the representative step standing in for `t_full`
    order: Vec<usize>,
    /// Number of full steps each representative step represents
    weights: Vec<f64>,
    /// Full step each representative step copies its data from
    source: Vec<usize>,
}

impl RepresentativeMapping {
    /// One representative step per full step.
    pub fn identity(steps: usize) -> Self {
        Self {
            order: (0..steps).collect(),
            weights: vec![1.0; steps],
            source: (0..steps).collect(),
        }
    }

    /// Mapping from an explicit order and source list; weights are the
    /// number of full steps mapped to each representative step.
    pub fn from_order(order: Vec<usize>, source: Vec<usize>) -> Result<Self, AggregationError> {
        let mut weights = vec![0.0; source.len()];
        for (t, &r) in order.iter().enumerate() {
            let w = weights.get_mut(r).ok_or_else(|| {
                AggregationError::InconsistentMapping(format!(
                    "step {} maps to representative step {} of {}",
                    t,
                    r,
                    source.len()
                ))
            })?;
            *w += 1.0;
        }
        if let Some(r) = weights.iter().position(|w| *w == 0.0) {
            return Err(AggregationError::InconsistentMapping(format!(
                "representative step {} represents no full step",
                r
            )));
        }
        if let Some(&t) = source.iter().find(|&&t| t >= order.len()) {
            return Err(AggregationError::InconsistentMapping(format!(
                "source step {} beyond horizon of {}",
                t,
                order.len()
            )));
        }
        Ok(Self {
            order,
            weights,
            source,
        })
    }

    pub fn n_full(&self) -> usize {
        self.order.len()
    }

    pub fn n_representative(&self) -> usize {
        self.weights.len()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn source(&self) -> &[usize] {
        &self.source
    }

    #[inline]
    pub fn representative_of(&self, t_full: usize) -> usize {
        self.order[t_full]
    }

    #[inline]
    pub fn weight(&self, t_rep: usize) -> f64 {
        self.weights[t_rep]
    }

    pub fn is_identity(&self) -> bool {
        self.order.len() == self.weights.len() && self.order.iter().enumerate().all(|(t, &r)| t == r)
    }

    /// Representative-resolution values of a full-resolution series.
    pub fn reduce(&self, full: &[f64]) -> Vec<f64> {
        self.source.iter().map(|&t| full[t]).collect()
    }
}

/// Seeded k-means typical-period selection.
#[derive(Debug, Clone)]
pub struct TemporalAggregator {
    clusters: usize,
    steps_per_period: usize,
    seed: u64,
    max_iterations: usize,
}

impl TemporalAggregator {
    pub fn new(clusters: usize, steps_per_period: usize) -> Self {
        Self {
            clusters,
            steps_per_period,
            seed: 42,
            max_iterations: 100,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Build from configuration; the period length must be a whole number of steps.
    pub fn from_config(
        config: &AggregationConfig,
        resolution_hours: f64,
        steps: usize,
    ) -> Result<Self, AggregationError> {
        let ratio = config.period_hours / resolution_hours;
        let steps_per_period = ratio.round() as usize;
        if steps_per_period == 0 || (ratio - steps_per_period as f64).abs() > 1e-9 {
            return Err(AggregationError::PartialPeriod {
                steps,
                steps_per_period: ratio.floor() as usize,
            });
        }
        Ok(Self::new(config.typical_days, steps_per_period)
            .with_seed(config.seed)
            .with_max_iterations(config.max_iterations))
    }

    pub fn aggregate(&self, store: &TimeSeriesStore) -> Result<RepresentativeMapping, AggregationError> {
        let steps = store.steps();
        let p = self.steps_per_period;
        if self.clusters == 0 {
            return Err(AggregationError::ZeroClusters);
        }
        if p == 0 || steps % p != 0 {
            return Err(AggregationError::PartialPeriod {
                steps,
                steps_per_period: p,
            });
        }
        let periods = steps / p;
        if periods < self.clusters {
            return Err(AggregationError::InsufficientPeriods {
                periods,
                clusters: self.clusters,
            });
        }
        if store.is_empty() {
            return Err(AggregationError::NoFeatures);
        }

        let points = period_profiles(store, p);
        let distinct = count_distinct(&points);
        if distinct < self.clusters {
            return Err(AggregationError::InsufficientDistinctPeriods {
                distinct,
                clusters: self.clusters,
            });
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = kmeans_plus_plus(&points, self.clusters, &mut rng);
        let assignment = lloyd(&points, &mut centroids, self.max_iterations);

        // rank clusters by their first member day
        let mut first_seen: Vec<(usize, usize)> = (0..self.clusters)
            .filter_map(|c| assignment.iter().position(|&a| a == c).map(|d| (d, c)))
            .collect();
        first_seen.sort_unstable();
        let mut rank = vec![usize::MAX; self.clusters];
        for (r, &(_, c)) in first_seen.iter().enumerate() {
            rank[c] = r;
        }
        let used = first_seen.len();
        if used < self.clusters {
            return Err(AggregationError::InconsistentMapping(format!(
                "clustering left {} of {} representative periods empty",
                self.clusters - used,
                self.clusters
            )));
        }

        let mut order = vec![0; steps];
        let mut weights = vec![0.0; used * p];
        let mut source = vec![0; used * p];
        for (&(_, cluster), r) in first_seen.iter().zip(0..) {
            let members: Vec<usize> = (0..periods).filter(|&d| assignment[d] == cluster).collect();
            let medoid = members
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    distance(&points[a], &centroids[cluster])
                        .total_cmp(&distance(&points[b], &centroids[cluster]))
                })
                .unwrap_or(members[0]);
            for h in 0..p {
                weights[r * p + h] = members.len() as f64;
                source[r * p + h] = medoid * p + h;
            }
        }
        for d in 0..periods {
            let r = rank[assignment[d]];
            for h in 0..p {
                order[d * p + h] = r * p + h;
            }
        }

        debug!(
            periods,
            clusters = used,
            steps_per_period = p,
            "aggregated horizon into representative periods"
        );

        Ok(RepresentativeMapping {
            order,
            weights,
            source,
        })
    }
}

/// Mapping for `config`: identity when aggregation is disabled.
pub fn representative_mapping(
    config: &AggregationConfig,
    resolution_hours: f64,
    store: &TimeSeriesStore,
) -> Result<RepresentativeMapping, AggregationError> {
    if !config.is_enabled() {
        return Ok(RepresentativeMapping::identity(store.steps()));
    }
    TemporalAggregator::from_config(config, resolution_hours, store.steps())?.aggregate(store)
}

/// One feature vector per period: all series, min-max normalised, concatenated.
fn period_profiles(store: &TimeSeriesStore, p: usize) -> Vec<Vec<f64>> {
    let periods = store.steps() / p;
    let mut points = vec![Vec::with_capacity(store.len() * p); periods];
    for (_, values) in store.iter() {
        let (lo, hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = hi - lo;
        for (d, point) in points.iter_mut().enumerate() {
            for &v in &values[d * p..(d + 1) * p] {
                point.push(if range > 1e-12 { (v - lo) / range } else { 0.0 });
            }
        }
    }
    points
}

/// Profiles closer than this (squared distance) count as the same period.
const SAME_PROFILE: f64 = 1e-12;

fn count_distinct(points: &[Vec<f64>]) -> usize {
    let mut seen: Vec<&Vec<f64>> = Vec::new();
    for point in points {
        if seen.iter().all(|s| distance(s, point) > SAME_PROFILE) {
            seen.push(point);
        }
    }
    seen.len()
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(c, centroid)| (c, distance(point, centroid)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut chosen = vec![rng.gen_range(0..points.len())];
    while chosen.len() < k {
        let centroids: Vec<Vec<f64>> = chosen.iter().map(|&i| points[i].clone()).collect();
        let weights: Vec<f64> = points
            .iter()
            .enumerate()
            .map(|(i, p)| if chosen.contains(&i) { 0.0 } else { nearest(p, &centroids).1 })
            .collect();
        let total: f64 = weights.iter().sum();
        let next = if total <= 1e-12 {
            // all remaining points coincide with a centroid
            (0..points.len()).find(|i| !chosen.contains(i)).unwrap_or(0)
        } else {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            weights
                .iter()
                .position(|&w| {
                    acc += w;
                    w > 0.0 && acc >= target
                })
                .unwrap_or_else(|| weights.iter().rposition(|&w| w > 0.0).unwrap_or(0))
        };
        chosen.push(next);
    }
    chosen.into_iter().map(|i| points[i].clone()).collect()
}

/// Lloyd iterations; keeps every cluster non-empty.
fn lloyd(points: &[Vec<f64>], centroids: &mut [Vec<f64>], max_iterations: usize) -> Vec<usize> {
    let k = centroids.len();
    let dim = points.first().map_or(0, Vec::len);
    let mut assignment: Vec<usize> = points.iter().map(|p| nearest(p, centroids).0).collect();

    for _ in 0..max_iterations {
        fill_empty_clusters(points, centroids, &mut assignment);

        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f64>> = points
                .iter()
                .zip(&assignment)
                .filter(|(_, &a)| a == c)
                .map(|(p, _)| p)
                .collect();
            if members.is_empty() {
                continue;
            }
            let mut mean = vec![0.0; dim];
            for p in &members {
                for (m, v) in mean.iter_mut().zip(p.iter()) {
                    *m += v;
                }
            }
            for m in &mut mean {
                *m /= members.len() as f64;
            }
            *centroid = mean;
        }

        let next: Vec<usize> = points.iter().map(|p| nearest(p, centroids).0).collect();
        if next == assignment {
            break;
        }
        assignment = next;
    }
    fill_empty_clusters(points, centroids, &mut assignment);
    assignment
}

/// Move the worst-fitting point of a shared cluster into each empty one.
fn fill_empty_clusters(points: &[Vec<f64>], centroids: &mut [Vec<f64>], assignment: &mut [usize]) {
    for c in 0..centroids.len() {
        if assignment.iter().any(|&a| a == c) {
            continue;
        }
        let mut sizes = vec![0usize; centroids.len()];
        for &a in assignment.iter() {
            sizes[a] += 1;
        }
        let donor = (0..points.len())
            .filter(|&i| sizes[assignment[i]] > 1)
            .max_by(|&a, &b| {
                distance(&points[a], &centroids[assignment[a]])
                    .total_cmp(&distance(&points[b], &centroids[assignment[b]]))
            });
        if let Some(i) = donor {
            assignment[i] = c;
            centroids[c] = points[i].clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SeriesKey, SeriesKind};

    /// Four 3-step days alternating between a low and a high profile.
    fn alternating_store() -> TimeSeriesStore {
        let mut values = Vec::new();
        for day in 0..4 {
            let base = if day % 2 == 0 { 1.0 } else { 10.0 };
            values.extend([base, base + 1.0, base]);
        }
        let mut store = TimeSeriesStore::new(12);
        store
            .insert(
                SeriesKey::carrier("n", "electricity", SeriesKind::Demand),
                values,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_identity_mapping() {
        let mapping = RepresentativeMapping::identity(5);
        assert!(mapping.is_identity());
        assert_eq!(mapping.order(), &[0, 1, 2, 3, 4]);
        assert_eq!(mapping.reduce(&[1.0, 2.0, 3.0, 4.0, 5.0]), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(mapping.weights().iter().all(|&w| w == 1.0));
    }

    #[test]
    fn test_disabled_config_gives_identity() {
        let store = alternating_store();
        let mapping = representative_mapping(&AggregationConfig::default(), 1.0, &store).unwrap();
        assert!(mapping.is_identity());
        assert_eq!(mapping.n_full(), 12);
    }

    #[test]
    fn test_two_clusters_separate_profiles() {
        let store = alternating_store();
        let mapping = TemporalAggregator::new(2, 3).aggregate(&store).unwrap();

        assert_eq!(mapping.n_representative(), 6);
        assert_eq!(mapping.order(), &[0, 1, 2, 3, 4, 5, 0, 1, 2, 3, 4, 5]);
        assert_eq!(mapping.weights(), &[2.0; 6]);
        let total: f64 = mapping.weights().iter().sum();
        assert_eq!(total, 12.0);

        let demand = store
            .carrier_series("n", &"electricity".into(), SeriesKind::Demand)
            .unwrap();
        let reduced = mapping.reduce(demand);
        assert_eq!(reduced, vec![1.0, 2.0, 1.0, 10.0, 11.0, 10.0]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let mut values = Vec::new();
        for day in 0..8 {
            let level = (day * 7 % 5) as f64;
            values.extend([level, level * 2.0, 1.0]);
        }
        let mut store = TimeSeriesStore::new(24);
        store
            .insert(
                SeriesKey::carrier("n", "heat", SeriesKind::Demand),
                values,
            )
            .unwrap();

        let aggregator = TemporalAggregator::new(3, 3).with_seed(7);
        let a = aggregator.aggregate(&store).unwrap();
        let b = aggregator.aggregate(&store).unwrap();
        assert_eq!(a, b);
        let total: f64 = a.weights().iter().sum();
        assert_eq!(total, 24.0);
        assert!(a.order().iter().all(|&r| r < a.n_representative()));
    }

    #[test]
    fn test_aggregation_errors() {
        let store = alternating_store();
        assert_eq!(
            TemporalAggregator::new(0, 3).aggregate(&store),
            Err(AggregationError::ZeroClusters)
        );
        assert_eq!(
            TemporalAggregator::new(2, 5).aggregate(&store),
            Err(AggregationError::PartialPeriod {
                steps: 12,
                steps_per_period: 5
            })
        );
        assert_eq!(
            TemporalAggregator::new(5, 3).aggregate(&store),
            Err(AggregationError::InsufficientPeriods {
                periods: 4,
                clusters: 5
            })
        );
        assert_eq!(
            TemporalAggregator::new(1, 3).aggregate(&TimeSeriesStore::new(12)),
            Err(AggregationError::NoFeatures)
        );
    }

    #[test]
    fn test_identical_days_cannot_fill_more_clusters() {
        let mut store = TimeSeriesStore::new(6);
        store
            .insert(
                SeriesKey::carrier("n", "electricity", SeriesKind::Demand),
                vec![1.0, 3.0, 2.0, 1.0, 3.0, 2.0],
            )
            .unwrap();
        assert_eq!(
            TemporalAggregator::new(2, 3).aggregate(&store),
            Err(AggregationError::InsufficientDistinctPeriods {
                distinct: 1,
                clusters: 2
            })
        );

        let mapping = TemporalAggregator::new(1, 3).aggregate(&store).unwrap();
        assert_eq!(mapping.n_representative(), 3);
        assert_eq!(mapping.weights(), &[2.0; 3]);
    }

    #[test]
    fn test_every_requested_cluster_is_used() {
        let mut values = Vec::new();
        for day in [0.0, 0.0, 0.0, 1.0, 2.0, 2.0] {
            values.extend([day, day + 0.5, day]);
        }
        let mut store = TimeSeriesStore::new(18);
        store
            .insert(SeriesKey::carrier("n", "heat", SeriesKind::Demand), values)
            .unwrap();
        for seed in 0..8 {
            let mapping = TemporalAggregator::new(3, 3).with_seed(seed).aggregate(&store).unwrap();
            assert_eq!(mapping.n_representative(), 9);
            let total: f64 = mapping.weights().iter().sum();
            assert_eq!(total, 18.0);
        }
    }

    #[test]
    fn test_from_config_requires_whole_periods() {
        let config = AggregationConfig {
            typical_days: 2,
            period_hours: 24.0,
            ..AggregationConfig::default()
        };
        assert!(TemporalAggregator::from_config(&config, 5.0, 48).is_err());
        assert!(TemporalAggregator::from_config(&config, 2.0, 48).is_ok());
    }

    #[test]
    fn test_from_order_counts_weights() {
        let mapping = RepresentativeMapping::from_order(vec![0, 1, 0, 1, 1], vec![0, 1]).unwrap();
        assert_eq!(mapping.weights(), &[2.0, 3.0]);
        assert!(!mapping.is_identity());
        assert!(RepresentativeMapping::from_order(vec![0, 2], vec![0, 1]).is_err());
        assert!(RepresentativeMapping::from_order(vec![0, 0], vec![0, 1]).is_err());
        assert!(RepresentativeMapping::from_order(vec![0, 1], vec![0, 5]).is_err());
    }

    #[test]
    fn test_mapping_serializes() {
        let json = serde_json::to_string(&RepresentativeMapping::identity(2)).unwrap();
        assert!(json.contains("\"order\":[0,1]"));
    }
}
