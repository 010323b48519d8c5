pub mod forest;
pub mod graph;
pub mod index;
pub mod params;
pub mod planner;
pub mod points;
pub mod spatial;

mod corpus;
mod math;
mod topk;

#[cfg(feature = "python")]
pub mod python_bindings;

pub use forest::{BucketForest, BucketLevel};
pub use graph::{GraphConfig, PostfilterIndex};
pub use index::{BatchResults, RangeFilterIndex};
pub use params::{QueryMethod, QueryParams};
pub use planner::{BucketRef, CoverPlan};
pub use points::{PointRange, SubsetRange};
pub use spatial::{PrefilterIndex, SpatialIndex};
pub use topk::Neighbor;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

/// Distance metric supported by the range-filtered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Euclidean distance (L2).
    L2,
    /// Inner product (maximum similarity).
    InnerProduct,
}

impl Metric {
    /// Distance between two vectors under this metric.
    ///
    /// Inner-product similarity is negated so that smaller is always
    /// better and candidates sort the same way for both metrics.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => math::l2_distance(a, b),
            Metric::InnerProduct => -math::dot(a, b),
        }
    }
}

/// Inclusive scalar interval constraining which points are eligible for a
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterWindow {
    pub lo: f32,
    pub hi: f32,
}

impl FilterWindow {
    pub fn new(lo: f32, hi: f32) -> Self {
        Self { lo, hi }
    }
}

impl From<(f32, f32)> for FilterWindow {
    fn from(bounds: (f32, f32)) -> Self {
        Self {
            lo: bounds.0,
            hi: bounds.1,
        }
    }
}

/// Errors that can occur when building or querying the range-filtered index.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RangeAnnError {
    /// Returned when input array shapes disagree with each other or with the
    /// built index.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
    /// Returned when an invalid configuration or input is supplied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Returned when an unrecognized query strategy name is supplied.
    #[error("unknown query method {0:?}")]
    UnknownMethod(String),
}
