//! Filter-ascending reordering of the input corpus.

use std::sync::Arc;

use rayon::prelude::*;

use crate::points::PointRange;
use crate::{FilterWindow, RangeAnnError};

/// The input corpus permuted into filter-ascending order, together with the
/// sorted filter values and the mapping back to original input ids.
///
/// All downstream state (buckets, spatial indices, planners) works in
/// sorted-id space; the remapper is consulted only when results are emitted.
#[derive(Debug)]
pub struct SortedCorpus {
    points: Arc<PointRange>,
    filter_values: Vec<f32>,
    sorted_to_original: Vec<usize>,
}

impl SortedCorpus {
    /// Validate the input, sort it by filter value, and gather the rows into
    /// a fresh dense store.
    ///
    /// Ties between equal filter values are broken arbitrarily.
    pub fn build(points: &[Vec<f32>], filter_values: &[f32]) -> Result<Self, RangeAnnError> {
        let n = points.len();
        if n == 0 {
            return Err(RangeAnnError::InvalidConfig("input corpus must be non-empty"));
        }
        if filter_values.len() != n {
            return Err(RangeAnnError::ShapeMismatch {
                expected: n,
                got: filter_values.len(),
            });
        }
        let dim = points[0].len();
        if dim == 0 {
            return Err(RangeAnnError::InvalidConfig(
                "point dimension must be positive",
            ));
        }
        if let Some(row) = points.iter().find(|row| row.len() != dim) {
            return Err(RangeAnnError::ShapeMismatch {
                expected: dim,
                got: row.len(),
            });
        }
        if filter_values.iter().any(|value| value.is_nan()) {
            return Err(RangeAnnError::InvalidConfig("filter values must not be NaN"));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_unstable_by(|&a, &b| filter_values[a].total_cmp(&filter_values[b]));

        let mut data = vec![0.0f32; n * dim];
        data.par_chunks_mut(dim)
            .zip(order.par_iter())
            .for_each(|(row, &source)| row.copy_from_slice(&points[source]));

        let sorted_filters: Vec<f32> = order.par_iter().map(|&source| filter_values[source]).collect();

        let points = Arc::new(PointRange::new(data, dim)?);
        Ok(Self {
            points,
            filter_values: sorted_filters,
            sorted_to_original: order,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.points.dim()
    }

    pub fn points(&self) -> &Arc<PointRange> {
        &self.points
    }

    pub fn filter_values(&self) -> &[f32] {
        &self.filter_values
    }

    pub fn filter_value(&self, sorted_id: usize) -> f32 {
        self.filter_values[sorted_id]
    }

    /// Original input id of the point now stored at `sorted_id`.
    pub fn original_id(&self, sorted_id: usize) -> usize {
        self.sorted_to_original[sorted_id]
    }

    /// First sorted id whose filter value is strictly greater than `value`.
    pub fn first_greater_than(&self, value: f32) -> usize {
        self.filter_values.partition_point(|&v| v <= value)
    }

    /// First sorted id whose filter value is greater than or equal to
    /// `value`.
    pub fn first_greater_than_or_equal_to(&self, value: f32) -> usize {
        self.filter_values.partition_point(|&v| v < value)
    }

    /// Resolve a filter window to the half-open sorted-id interval it
    /// selects: lower bound exclusive, upper bound resolved by
    /// first-greater-than-or-equal. Inverted windows resolve empty.
    pub fn resolve_window(&self, window: FilterWindow) -> (usize, usize) {
        let start = self.first_greater_than(window.lo);
        let end = self.first_greater_than_or_equal_to(window.hi);
        (start, end.max(start))
    }

    /// True when the window lies entirely outside the corpus filter range.
    pub fn window_outside_range(&self, window: FilterWindow) -> bool {
        window.hi < self.filter_values[0] || window.lo > self.filter_values[self.len() - 1]
    }
}
