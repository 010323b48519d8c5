//! Range-filtered ANN index: build entry point, query strategies, and the
//! batch surface.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::corpus::SortedCorpus;
use crate::forest::BucketForest;
use crate::graph::PostfilterIndex;
use crate::params::{QueryMethod, QueryParams};
use crate::planner::{self, BucketRef};
use crate::spatial::SpatialIndex;
use crate::topk::{self, Neighbor};
use crate::{FilterWindow, Metric, RangeAnnError};

/// Hierarchical bucketed index answering k-nearest-neighbor queries
/// constrained to a filter-value window.
///
/// Built once over a static corpus; all state is immutable afterwards and
/// safely shared by concurrent readers. The index is generic over the
/// spatial-index variant used inside each bucket.
#[derive(Debug)]
pub struct RangeFilterIndex<S: SpatialIndex = PostfilterIndex> {
    corpus: SortedCorpus,
    forest: BucketForest<S>,
    bucket_sizes: Vec<usize>,
    cutoff: usize,
    metric: Metric,
}

impl<S: SpatialIndex> RangeFilterIndex<S> {
    pub const DEFAULT_CUTOFF: usize = 1000;

    /// Build with the variant's default configuration.
    pub fn build(
        points: &[Vec<f32>],
        filter_values: &[f32],
        cutoff: usize,
        metric: Metric,
    ) -> Result<Self, RangeAnnError> {
        Self::build_with_config(points, filter_values, cutoff, metric, &S::Config::default())
    }

    /// Sort the corpus by filter value and build every bucket at every
    /// level of the dyadic ladder.
    pub fn build_with_config(
        points: &[Vec<f32>],
        filter_values: &[f32],
        cutoff: usize,
        metric: Metric,
        config: &S::Config,
    ) -> Result<Self, RangeAnnError> {
        if cutoff == 0 {
            return Err(RangeAnnError::InvalidConfig("cutoff must be positive"));
        }
        let corpus = SortedCorpus::build(points, filter_values)?;
        let forest =
            BucketForest::build(corpus.points(), corpus.filter_values(), cutoff, metric, config);
        let bucket_sizes = forest.bucket_sizes();
        Ok(Self {
            corpus,
            forest,
            bucket_sizes,
            cutoff,
            metric,
        })
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.corpus.dim()
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn cutoff(&self) -> usize {
        self.cutoff
    }

    pub fn num_levels(&self) -> usize {
        self.forest.num_levels()
    }

    /// Bucket sizes per level, ascending.
    pub fn bucket_sizes(&self) -> &[usize] {
        &self.bucket_sizes
    }

    /// Sorted filter values backing the index.
    pub fn filter_values(&self) -> &[f32] {
        self.corpus.filter_values()
    }

    /// Original input id of the point at a sorted id.
    pub fn original_id(&self, sorted_id: usize) -> usize {
        self.corpus.original_id(sorted_id)
    }

    /// Run one query with the chosen strategy. Result ids are original
    /// input ids, ascending by distance, at most `qp.k` of them.
    pub fn search(
        &self,
        query: &[f32],
        window: FilterWindow,
        method: QueryMethod,
        qp: &QueryParams,
    ) -> Result<Vec<Neighbor>, RangeAnnError> {
        if query.len() != self.dim() {
            return Err(RangeAnnError::ShapeMismatch {
                expected: self.dim(),
                got: query.len(),
            });
        }
        let results = self.dispatch(query, window, method, qp);
        Ok(results
            .into_iter()
            .map(|candidate| Neighbor {
                id: self.corpus.original_id(candidate.id),
                distance: candidate.distance,
            })
            .collect())
    }

    /// Batch entry point: one strategy for all queries, one query per task
    /// across the thread pool.
    ///
    /// Outputs are row-major `queries.len() x qp.k` matrices of original
    /// ids and distances; rows with fewer than `qp.k` candidates are padded
    /// with id `0` and distance `+inf`.
    pub fn batch_search(
        &self,
        queries: &[Vec<f32>],
        windows: &[FilterWindow],
        method: &str,
        qp: &QueryParams,
    ) -> Result<BatchResults, RangeAnnError> {
        let method = QueryMethod::from_name(method)?;
        if windows.len() != queries.len() {
            return Err(RangeAnnError::ShapeMismatch {
                expected: queries.len(),
                got: windows.len(),
            });
        }
        let dim = self.dim();
        if let Some(row) = queries.iter().find(|query| query.len() != dim) {
            return Err(RangeAnnError::ShapeMismatch {
                expected: dim,
                got: row.len(),
            });
        }

        let k = qp.k;
        let rows = queries.len();
        if k == 0 {
            return Ok(BatchResults {
                rows,
                k,
                ids: Vec::new(),
                distances: Vec::new(),
            });
        }

        let mut ids = vec![0u32; rows * k];
        let mut distances = vec![f32::INFINITY; rows * k];

        ids.par_chunks_mut(k)
            .zip(distances.par_chunks_mut(k))
            .enumerate()
            .for_each(|(row, (id_row, distance_row))| {
                let results = self.dispatch(&queries[row], windows[row], method, qp);
                for (slot, candidate) in results.iter().take(k).enumerate() {
                    id_row[slot] = self.corpus.original_id(candidate.id) as u32;
                    distance_row[slot] = candidate.distance;
                }
            });

        Ok(BatchResults {
            rows,
            k,
            ids,
            distances,
        })
    }

    fn dispatch(
        &self,
        query: &[f32],
        window: FilterWindow,
        method: QueryMethod,
        qp: &QueryParams,
    ) -> Vec<Neighbor> {
        match method {
            QueryMethod::FenwickTree => self.fenwick_tree_search(query, window, qp),
            QueryMethod::OptimizedPostfilter => {
                self.optimized_postfiltering_search(query, window, qp)
            }
            QueryMethod::ThreeSplit => self.three_split_search(query, window, qp),
        }
    }

    /// Dyadic-cover strategy: precomputed buckets for the interior of the
    /// window, brute force for the short tails. Results are sorted-id
    /// candidates.
    pub(crate) fn fenwick_tree_search(
        &self,
        query: &[f32],
        window: FilterWindow,
        qp: &QueryParams,
    ) -> Vec<Neighbor> {
        if self.window_misses_corpus(window) {
            return Vec::new();
        }
        let span = self.corpus.resolve_window(window);
        if span.0 >= span.1 {
            return Vec::new();
        }

        let plan = planner::dyadic_cover(span, &self.bucket_sizes);
        let mut frontier: Vec<Neighbor> = Vec::new();
        for bucket in &plan.buckets {
            frontier.extend(self.forest.spatial_index(bucket).query(query, window, qp));
        }
        for (tail_start, tail_end) in plan.tails() {
            self.brute_force_into(query, tail_start, tail_end, &mut frontier);
        }

        topk::sort_by_distance(&mut frontier);
        frontier.truncate(qp.k);
        frontier
    }

    /// Single-bucket strategy: route the whole window to the smallest
    /// containing bucket and let its spatial index postfilter.
    pub(crate) fn optimized_postfiltering_search(
        &self,
        query: &[f32],
        window: FilterWindow,
        qp: &QueryParams,
    ) -> Vec<Neighbor> {
        if self.window_misses_corpus(window) {
            return Vec::new();
        }
        let span = self.corpus.resolve_window(window);
        if span.0 >= span.1 {
            return Vec::new();
        }
        match self.route_single_bucket(span, qp) {
            Some(bucket) => self.forest.spatial_index(&bucket).query(query, window, qp),
            None => self.fenwick_tree_search(query, window, qp),
        }
    }

    /// Routing decision for the single-bucket strategy; `None` means fall
    /// back to the dyadic strategy. Exposed separately so tests and tooling
    /// can observe the planner.
    pub(crate) fn route_single_bucket(
        &self,
        span: (usize, usize),
        qp: &QueryParams,
    ) -> Option<BucketRef> {
        let width = span.1 - span.0;
        if 4 * width < self.cutoff {
            return None;
        }
        let bucket = planner::smallest_containing_bucket(span, &self.bucket_sizes, self.len())?;
        let size = self.bucket_sizes[bucket.level];
        if qp.verbose {
            debug!(
                span_start = span.0,
                span_end = span.1,
                bucket_size = size,
                bucket_start = bucket.start,
                bucket_end = bucket.end,
                "smallest containing bucket"
            );
        }
        if let Some(max_ratio) = qp.min_query_to_bucket_ratio {
            let ratio = size as f32 / width as f32;
            if ratio > max_ratio {
                return None;
            }
        }
        Some(bucket)
    }

    /// Three-way strategy: the largest contained bucket serves the center
    /// of the window, the remaining value ranges recurse through the
    /// single-bucket strategy.
    pub(crate) fn three_split_search(
        &self,
        query: &[f32],
        window: FilterWindow,
        qp: &QueryParams,
    ) -> Vec<Neighbor> {
        let span = self.corpus.resolve_window(window);
        if span.0 >= span.1 {
            return self.fenwick_tree_search(query, window, qp);
        }
        let Some(center) = planner::largest_contained_bucket(span, &self.bucket_sizes, self.len())
        else {
            return self.fenwick_tree_search(query, window, qp);
        };

        // every center point is in-window, so the postfilter beam widening
        // cannot pay off there
        let center_qp = QueryParams {
            final_beam_multiply: 1,
            ..qp.clone()
        };
        let mut frontier = self
            .forest
            .spatial_index(&center)
            .query(query, window, &center_qp);

        if center.start > span.0 {
            let left = FilterWindow::new(window.lo, self.corpus.filter_value(center.start));
            frontier.extend(self.optimized_postfiltering_search(query, left, qp));
        }
        if span.1 > center.end {
            // the open lower bound sits on the last value covered by the
            // center, keeping the point at `center.end` eligible
            let right = FilterWindow::new(self.corpus.filter_value(center.end - 1), window.hi);
            frontier.extend(self.optimized_postfiltering_search(query, right, qp));
        }

        topk::sort_by_distance(&mut frontier);
        frontier.truncate(qp.k);
        frontier
    }

    fn brute_force_into(
        &self,
        query: &[f32],
        start: usize,
        end: usize,
        frontier: &mut Vec<Neighbor>,
    ) {
        let points = self.corpus.points();
        for sorted_id in start..end {
            frontier.push(Neighbor {
                id: sorted_id,
                distance: self.metric.distance(query, points.point(sorted_id)),
            });
        }
    }

    fn window_misses_corpus(&self, window: FilterWindow) -> bool {
        let missed = self.corpus.window_outside_range(window);
        if missed {
            let values = self.corpus.filter_values();
            warn!(
                lo = window.lo,
                hi = window.hi,
                corpus_min = values[0],
                corpus_max = values[values.len() - 1],
                "query window lies entirely outside the corpus filter range"
            );
        }
        missed
    }

    #[cfg(test)]
    pub(crate) fn resolve_window(&self, window: FilterWindow) -> (usize, usize) {
        self.corpus.resolve_window(window)
    }

    #[cfg(test)]
    pub(crate) fn corpus(&self) -> &SortedCorpus {
        &self.corpus
    }
}

/// Row-major batch output; unfilled trailing slots hold id `0` and
/// distance `+inf`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResults {
    rows: usize,
    k: usize,
    ids: Vec<u32>,
    distances: Vec<f32>,
}

impl BatchResults {
    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Original ids for one query row.
    pub fn row_ids(&self, row: usize) -> &[u32] {
        &self.ids[row * self.k..(row + 1) * self.k]
    }

    /// Distances for one query row.
    pub fn row_distances(&self, row: usize) -> &[f32] {
        &self.distances[row * self.k..(row + 1) * self.k]
    }

    /// Flat row-major id matrix.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Flat row-major distance matrix.
    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    pub fn into_parts(self) -> (Vec<u32>, Vec<f32>) {
        (self.ids, self.distances)
    }
}
