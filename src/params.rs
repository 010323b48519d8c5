//! Query-time parameters and strategy selection.

use serde::{Deserialize, Serialize};

use crate::RangeAnnError;

/// Parameters for a range-filtered search, forwarded to per-bucket spatial
/// indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Number of neighbors requested.
    pub k: usize,
    /// Exploration beam width for graph traversal.
    pub beam_size: usize,
    /// Early-termination slack: traversal stops once the closest unexplored
    /// candidate is worse than `cut` times the current kth-best distance.
    pub cut: f32,
    /// Maximum number of distance evaluations per graph traversal.
    pub limit: usize,
    /// Out-degree cap applied while traversing the graph.
    pub degree_limit: usize,
    /// Beam multiplier for the final refinement pass of a postfiltered
    /// search; `1` disables the extra pass.
    pub final_beam_multiply: usize,
    /// Upper bound on the beam width reached by postfilter widening.
    pub postfiltering_max_beam: usize,
    /// When set, a single containing bucket more than this many times larger
    /// than the query span is rejected in favor of the dyadic strategy.
    pub min_query_to_bucket_ratio: Option<f32>,
    /// Emit planner traces through the logging sink.
    pub verbose: bool,
}

impl QueryParams {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            k: 10,
            beam_size: 100,
            cut: 1.35,
            limit: usize::MAX,
            degree_limit: usize::MAX,
            final_beam_multiply: 2,
            postfiltering_max_beam: 2048,
            min_query_to_bucket_ratio: None,
            verbose: false,
        }
    }
}

/// Query strategy dispatched by the batch entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMethod {
    /// Dyadic interior cover plus brute-forced tails.
    FenwickTree,
    /// Single smallest containing bucket, postfiltered.
    OptimizedPostfilter,
    /// Center bucket plus recursive left/right tail searches.
    ThreeSplit,
}

impl QueryMethod {
    /// Parse the wire name used by the batch entry point.
    pub fn from_name(name: &str) -> Result<Self, RangeAnnError> {
        match name {
            "fenwick_tree" => Ok(Self::FenwickTree),
            "optimized_postfilter" => Ok(Self::OptimizedPostfilter),
            "three_split" => Ok(Self::ThreeSplit),
            other => Err(RangeAnnError::UnknownMethod(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FenwickTree => "fenwick_tree",
            Self::OptimizedPostfilter => "optimized_postfilter",
            Self::ThreeSplit => "three_split",
        }
    }
}

impl std::str::FromStr for QueryMethod {
    type Err = RangeAnnError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::from_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RangeAnnError;

    #[test]
    fn method_names_round_trip() {
        for method in [
            QueryMethod::FenwickTree,
            QueryMethod::OptimizedPostfilter,
            QueryMethod::ThreeSplit,
        ] {
            assert_eq!(QueryMethod::from_name(method.name()).unwrap(), method);
        }
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = QueryMethod::from_name("linear_scan").unwrap_err();
        assert_eq!(err, RangeAnnError::UnknownMethod("linear_scan".to_string()));
    }
}
