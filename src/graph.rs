//! Graph-based spatial index with in-traversal window postfiltering.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::params::QueryParams;
use crate::points::SubsetRange;
use crate::spatial::SpatialIndex;
use crate::topk::{self, Neighbor, TopK};
use crate::{FilterWindow, Metric};

/// Build-time parameters for the proximity graph behind
/// [`PostfilterIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Maximum out-degree kept after pruning.
    pub max_degree: usize,
    /// Beam width used while inserting points during construction.
    pub build_beam: usize,
    /// Robust-pruning slack; larger values keep denser graphs.
    pub alpha: f32,
    /// Seed for the insertion-order shuffle.
    pub seed: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_degree: 32,
            build_beam: 64,
            alpha: 1.2,
            seed: 0x5a5a_a5a5,
        }
    }
}

const BUILD_CUT: f32 = 1.35;

#[derive(Debug, Clone, Copy)]
struct FrontierItem {
    distance: f32,
    id: u32,
}

impl PartialEq for FrontierItem {
    fn eq(&self, other: &Self) -> bool {
        self.distance.to_bits() == other.distance.to_bits() && self.id == other.id
    }
}

impl Eq for FrontierItem {}

impl PartialOrd for FrontierItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Graph ANN over one bucket.
///
/// The filter window is applied while harvesting beam results; the beam is
/// doubled until enough in-window candidates survive or
/// `postfiltering_max_beam` is reached, then one refinement pass runs with
/// the beam multiplied by `final_beam_multiply`.
#[derive(Debug)]
pub struct PostfilterIndex {
    points: SubsetRange,
    filter_values: Vec<f32>,
    metric: Metric,
    neighbors: Vec<Vec<u32>>,
    entry: u32,
}

impl SpatialIndex for PostfilterIndex {
    type Config = GraphConfig;

    fn build(
        points: SubsetRange,
        filter_values: Vec<f32>,
        metric: Metric,
        config: &GraphConfig,
    ) -> Self {
        debug_assert_eq!(points.len(), filter_values.len());
        let n = points.len();
        let mut index = Self {
            points,
            filter_values,
            metric,
            neighbors: vec![Vec::new(); n],
            entry: 0,
        };
        if n <= 1 {
            return index;
        }

        index.entry = index.medoid() as u32;

        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(config.seed);
        order.shuffle(&mut rng);

        for &id in &order {
            if id == index.entry as usize {
                continue;
            }
            let query = index.points.point(id).to_vec();
            let beam = index.beam_search(
                &query,
                config.build_beam,
                usize::MAX,
                usize::MAX,
                BUILD_CUT,
            );
            let pruned = index.robust_prune(id, beam, config.alpha, config.max_degree);
            index.neighbors[id] = pruned.clone();
            for nb in pruned {
                let nb = nb as usize;
                index.neighbors[nb].push(id as u32);
                if index.neighbors[nb].len() > config.max_degree {
                    let candidates: Vec<Neighbor> = index.neighbors[nb]
                        .iter()
                        .map(|&other| Neighbor {
                            id: other as usize,
                            distance: index
                                .metric
                                .distance(index.points.point(nb), index.points.point(other as usize)),
                        })
                        .collect();
                    let trimmed =
                        index.robust_prune(nb, candidates, config.alpha, config.max_degree);
                    index.neighbors[nb] = trimmed;
                }
            }
        }
        index
    }

    fn query(&self, query: &[f32], window: FilterWindow, qp: &QueryParams) -> Vec<Neighbor> {
        let n = self.points.len();
        if n == 0 || qp.k == 0 {
            return Vec::new();
        }

        let mut beam = qp.beam_size.max(qp.k);
        let mut hits = self.filtered_pass(query, window, beam, qp);
        while hits.len() < qp.k && beam < qp.postfiltering_max_beam && beam < n {
            beam = beam.saturating_mul(2).min(qp.postfiltering_max_beam);
            hits = self.filtered_pass(query, window, beam, qp);
        }
        if hits.len() < qp.k && qp.final_beam_multiply > 1 && beam < n {
            let boosted = beam.saturating_mul(qp.final_beam_multiply);
            hits = self.filtered_pass(query, window, boosted, qp);
        }

        hits.truncate(qp.k);
        hits.into_iter()
            .map(|candidate| Neighbor {
                id: self.points.global_id(candidate.id),
                distance: candidate.distance,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

impl PostfilterIndex {
    /// Point closest to the bucket mean, used as the traversal entry.
    fn medoid(&self) -> usize {
        let n = self.points.len();
        let dim = self.points.dim();
        let mut mean = vec![0.0f32; dim];
        for id in 0..n {
            for (acc, &value) in mean.iter_mut().zip(self.points.point(id)) {
                *acc += value;
            }
        }
        for acc in mean.iter_mut() {
            *acc /= n as f32;
        }

        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for id in 0..n {
            let distance = self.metric.distance(&mean, self.points.point(id));
            if distance < best_distance {
                best_distance = distance;
                best = id;
            }
        }
        best
    }

    /// One beam search over the current graph. Returns the beam, ascending
    /// by distance.
    fn beam_search(
        &self,
        query: &[f32],
        beam: usize,
        limit: usize,
        degree_limit: usize,
        cut: f32,
    ) -> Vec<Neighbor> {
        let n = self.points.len();
        let entry = self.entry as usize;

        let mut seen = vec![false; n];
        let mut best = TopK::new(beam.max(1));
        let mut frontier: BinaryHeap<Reverse<FrontierItem>> = BinaryHeap::new();

        let entry_distance = self.metric.distance(query, self.points.point(entry));
        seen[entry] = true;
        best.push(entry, entry_distance);
        frontier.push(Reverse(FrontierItem {
            distance: entry_distance,
            id: self.entry,
        }));

        let mut evaluated = 1usize;
        'search: while let Some(Reverse(item)) = frontier.pop() {
            if let Some(threshold) = best.threshold() {
                let bound = if threshold > 0.0 {
                    threshold * cut.max(1.0)
                } else {
                    threshold
                };
                if item.distance > bound {
                    break;
                }
            }
            let node = item.id as usize;
            for &neighbor in self.neighbors[node].iter().take(degree_limit) {
                let neighbor = neighbor as usize;
                if seen[neighbor] {
                    continue;
                }
                seen[neighbor] = true;
                if evaluated >= limit {
                    break 'search;
                }
                evaluated += 1;
                let distance = self.metric.distance(query, self.points.point(neighbor));
                let admit = match best.threshold() {
                    None => true,
                    Some(threshold) => distance <= threshold,
                };
                if admit {
                    best.push(neighbor, distance);
                    frontier.push(Reverse(FrontierItem {
                        distance,
                        id: neighbor as u32,
                    }));
                }
            }
        }

        best.into_sorted()
    }

    /// DiskANN-style robust pruning: greedily keep the closest candidate
    /// and drop everything it dominates within the `alpha` slack.
    fn robust_prune(
        &self,
        node: usize,
        mut candidates: Vec<Neighbor>,
        alpha: f32,
        max_degree: usize,
    ) -> Vec<u32> {
        candidates.retain(|candidate| candidate.id != node);
        topk::sort_by_distance(&mut candidates);
        candidates.dedup_by_key(|candidate| candidate.id);

        let mut selected: Vec<u32> = Vec::with_capacity(max_degree.min(candidates.len()));
        let mut alive = vec![true; candidates.len()];
        for i in 0..candidates.len() {
            if !alive[i] {
                continue;
            }
            selected.push(candidates[i].id as u32);
            if selected.len() == max_degree {
                break;
            }
            let pivot = self.points.point(candidates[i].id);
            for j in (i + 1)..candidates.len() {
                if !alive[j] {
                    continue;
                }
                let detour = self.metric.distance(pivot, self.points.point(candidates[j].id));
                if alpha * detour <= candidates[j].distance {
                    alive[j] = false;
                }
            }
        }
        selected
    }

    fn filtered_pass(
        &self,
        query: &[f32],
        window: FilterWindow,
        beam: usize,
        qp: &QueryParams,
    ) -> Vec<Neighbor> {
        let frontier = self.beam_search(query, beam, qp.limit, qp.degree_limit, qp.cut);
        frontier
            .into_iter()
            .filter(|candidate| {
                let value = self.filter_values[candidate.id];
                window.lo < value && value < window.hi
            })
            .collect()
    }
}
