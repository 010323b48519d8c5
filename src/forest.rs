//! Dyadic ladder of bucketed spatial indices over the sorted corpus.

use std::sync::Arc;

use rayon::prelude::*;

use crate::planner::BucketRef;
use crate::points::{PointRange, SubsetRange};
use crate::spatial::SpatialIndex;
use crate::Metric;

/// One partition of the corpus into contiguous buckets of a fixed size.
///
/// The last bucket may be shorter when the bucket size does not divide the
/// corpus.
#[derive(Debug)]
pub struct BucketLevel<S> {
    bucket_size: usize,
    buckets: Vec<S>,
}

impl<S> BucketLevel<S> {
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket(&self, bucket: usize) -> &S {
        &self.buckets[bucket]
    }
}

/// All bucket levels, smallest bucket size first.
///
/// Level sizes double from `cutoff` while they stay below `2n`, so the top
/// level is a single bucket covering the whole corpus; with `cutoff >= 2n`
/// there are no levels at all and every query is brute-forced.
#[derive(Debug)]
pub struct BucketForest<S> {
    levels: Vec<BucketLevel<S>>,
    num_points: usize,
}

impl<S: SpatialIndex> BucketForest<S> {
    /// Build every bucket at every level. Buckets within a level build in
    /// parallel; levels build one after another.
    pub fn build(
        points: &Arc<PointRange>,
        filter_values: &[f32],
        cutoff: usize,
        metric: Metric,
        config: &S::Config,
    ) -> Self {
        let n = points.len();
        let mut levels = Vec::new();
        let mut bucket_size = cutoff;
        while bucket_size < 2 * n {
            let num_buckets = (n + bucket_size - 1) / bucket_size;
            let buckets: Vec<S> = (0..num_buckets)
                .into_par_iter()
                .map(|bucket| {
                    let start = bucket * bucket_size;
                    let end = (start + bucket_size).min(n);
                    let subset = SubsetRange::new(Arc::clone(points), start, end - start);
                    S::build(subset, filter_values[start..end].to_vec(), metric, config)
                })
                .collect();
            levels.push(BucketLevel {
                bucket_size,
                buckets,
            });
            bucket_size *= 2;
        }
        Self {
            levels,
            num_points: n,
        }
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &BucketLevel<S> {
        &self.levels[level]
    }

    pub fn levels(&self) -> &[BucketLevel<S>] {
        &self.levels
    }

    /// Bucket sizes per level, ascending.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.bucket_size).collect()
    }

    /// The spatial index owned by a planned bucket.
    pub fn spatial_index(&self, bucket: &BucketRef) -> &S {
        self.levels[bucket.level].bucket(bucket.bucket)
    }
}
