//! Capability interface for per-bucket spatial ANN indices.

use crate::params::QueryParams;
use crate::points::SubsetRange;
use crate::topk::{Neighbor, TopK};
use crate::{FilterWindow, Metric};

/// A spatial ANN index over one contiguous bucket of the sorted corpus.
///
/// Implementations are built exactly once, over an immutable subset of the
/// sorted point store together with the aligned slice of filter values, and
/// answer window-constrained neighbor queries. Returned ids are sorted-corpus
/// ids (the subset's global ids), distances are real values without
/// sentinels, and results come back ascending by distance, at most
/// `qp.k` of them.
///
/// The window predicate matches the planner's resolution: a point with
/// filter value `v` is eligible iff `lo < v && v < hi`. Callers that pass a
/// window covering the whole bucket therefore get an unconstrained search.
pub trait SpatialIndex: Send + Sync + Sized {
    /// Variant-specific build configuration.
    type Config: Clone + Default + Send + Sync;

    fn build(
        points: SubsetRange,
        filter_values: Vec<f32>,
        metric: Metric,
        config: &Self::Config,
    ) -> Self;

    fn query(&self, query: &[f32], window: FilterWindow, qp: &QueryParams) -> Vec<Neighbor>;

    fn len(&self) -> usize;
}

/// Spatial index that resolves the window first and scans only the eligible
/// contiguous range of its bucket.
///
/// Exact within its bucket; the beam-related knobs in [`QueryParams`] are
/// ignored.
#[derive(Debug)]
pub struct PrefilterIndex {
    points: SubsetRange,
    filter_values: Vec<f32>,
    metric: Metric,
}

impl SpatialIndex for PrefilterIndex {
    type Config = ();

    fn build(
        points: SubsetRange,
        filter_values: Vec<f32>,
        metric: Metric,
        _config: &(),
    ) -> Self {
        debug_assert_eq!(points.len(), filter_values.len());
        Self {
            points,
            filter_values,
            metric,
        }
    }

    fn query(&self, query: &[f32], window: FilterWindow, qp: &QueryParams) -> Vec<Neighbor> {
        if qp.k == 0 || self.points.is_empty() {
            return Vec::new();
        }
        // the filter slice is sorted, so the eligible ids form one run
        let start = self.filter_values.partition_point(|&v| v <= window.lo);
        let end = self
            .filter_values
            .partition_point(|&v| v < window.hi)
            .max(start);

        let mut topk = TopK::new(qp.k);
        for local in start..end {
            let distance = self.metric.distance(query, self.points.point(local));
            topk.push(self.points.global_id(local), distance);
        }
        topk.into_sorted()
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}
