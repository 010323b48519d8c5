//! Python bindings for the range-filtered ANN index using PyO3
#![allow(non_local_definitions)]

use numpy::{PyArray1, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::graph::PostfilterIndex;
use crate::index::RangeFilterIndex;
use crate::params::QueryParams;
use crate::spatial::PrefilterIndex;
use crate::{FilterWindow, Metric, RangeAnnError};

enum BuiltIndex {
    Prefilter(RangeFilterIndex<PrefilterIndex>),
    Postfilter(RangeFilterIndex<PostfilterIndex>),
}

fn to_py_err(err: RangeAnnError) -> PyErr {
    match err {
        RangeAnnError::UnknownMethod(_) | RangeAnnError::ShapeMismatch { .. } => {
            PyValueError::new_err(err.to_string())
        }
        RangeAnnError::InvalidConfig(_) => PyRuntimeError::new_err(err.to_string()),
    }
}

#[pyclass(name = "RangeFilterIndex")]
pub struct PyRangeFilterIndex {
    index: Option<BuiltIndex>,
    metric: Metric,
    prefilter: bool,
    cutoff: usize,
    dimension: usize,
}

#[pymethods]
impl PyRangeFilterIndex {
    /// Create a new range-filtered index configuration
    #[new]
    #[pyo3(signature = (dimension, metric="euclidean", variant="postfilter", cutoff=1000))]
    fn new(dimension: usize, metric: &str, variant: &str, cutoff: usize) -> PyResult<Self> {
        let metric = match metric {
            "euclidean" | "l2" => Metric::L2,
            "ip" | "inner_product" => Metric::InnerProduct,
            _ => {
                return Err(PyValueError::new_err(format!(
                    "Invalid metric: {}. Use 'euclidean' or 'inner_product'",
                    metric
                )))
            }
        };

        let prefilter = match variant {
            "prefilter" => true,
            "postfilter" => false,
            _ => {
                return Err(PyValueError::new_err(format!(
                    "Invalid variant: {}. Use 'prefilter' or 'postfilter'",
                    variant
                )))
            }
        };

        Ok(Self {
            index: None,
            metric,
            prefilter,
            cutoff,
            dimension,
        })
    }

    /// Build the index from points (N x D) and filter values (N)
    fn fit(
        &mut self,
        points: PyReadonlyArray2<f32>,
        filter_values: PyReadonlyArray1<f32>,
    ) -> PyResult<()> {
        let points = points.as_array();
        let shape = points.shape();

        if shape[1] != self.dimension {
            return Err(PyValueError::new_err(format!(
                "Data dimension {} does not match expected {}",
                shape[1], self.dimension
            )));
        }

        let rows: Vec<Vec<f32>> = (0..shape[0])
            .map(|i| points.row(i).iter().copied().collect())
            .collect();
        let filters: Vec<f32> = filter_values.as_slice()?.to_vec();

        let built = if self.prefilter {
            RangeFilterIndex::<PrefilterIndex>::build(&rows, &filters, self.cutoff, self.metric)
                .map(BuiltIndex::Prefilter)
        } else {
            RangeFilterIndex::<PostfilterIndex>::build(&rows, &filters, self.cutoff, self.metric)
                .map(BuiltIndex::Postfilter)
        };

        match built {
            Ok(index) => {
                self.index = Some(index);
                Ok(())
            }
            Err(err) => Err(to_py_err(err)),
        }
    }

    /// Batch search: queries (Q x D), windows as two Q-length arrays.
    /// Returns (ids, distances) numpy arrays, each of shape (Q, k); rows
    /// with fewer than k candidates are padded with id 0 and distance +inf.
    #[allow(clippy::too_many_arguments)]
    #[pyo3(signature = (
        queries,
        filter_lows,
        filter_highs,
        k,
        method="fenwick_tree",
        beam_size=100,
        final_beam_multiply=2,
        postfiltering_max_beam=2048,
        min_query_to_bucket_ratio=None,
        verbose=false
    ))]
    fn batch_query(
        &self,
        py: Python,
        queries: PyReadonlyArray2<f32>,
        filter_lows: PyReadonlyArray1<f32>,
        filter_highs: PyReadonlyArray1<f32>,
        k: usize,
        method: &str,
        beam_size: usize,
        final_beam_multiply: usize,
        postfiltering_max_beam: usize,
        min_query_to_bucket_ratio: Option<f32>,
        verbose: bool,
    ) -> PyResult<(PyObject, PyObject)> {
        let index = self.index.as_ref().ok_or_else(|| {
            PyRuntimeError::new_err("Index not built yet. Call fit() first.")
        })?;

        let queries = queries.as_array();
        let shape = queries.shape();
        if shape[1] != self.dimension {
            return Err(PyValueError::new_err(format!(
                "Query dimension {} does not match expected {}",
                shape[1], self.dimension
            )));
        }

        let lows = filter_lows.as_slice()?;
        let highs = filter_highs.as_slice()?;
        if lows.len() != shape[0] || highs.len() != shape[0] {
            return Err(PyValueError::new_err(
                "filter_lows and filter_highs must have one entry per query",
            ));
        }

        let query_vecs: Vec<Vec<f32>> = (0..shape[0])
            .map(|i| queries.row(i).iter().copied().collect())
            .collect();
        let windows: Vec<FilterWindow> = lows
            .iter()
            .zip(highs.iter())
            .map(|(&lo, &hi)| FilterWindow::new(lo, hi))
            .collect();

        let qp = QueryParams {
            k,
            beam_size,
            final_beam_multiply,
            postfiltering_max_beam,
            min_query_to_bucket_ratio,
            verbose,
            ..QueryParams::default()
        };

        let results = match index {
            BuiltIndex::Prefilter(inner) => inner.batch_search(&query_vecs, &windows, method, &qp),
            BuiltIndex::Postfilter(inner) => inner.batch_search(&query_vecs, &windows, method, &qp),
        }
        .map_err(to_py_err)?;

        let rows = results.num_rows();
        let (ids, distances) = results.into_parts();

        let ids_array = PyArray1::<u32>::from_vec(py, ids)
            .reshape([rows, k])
            .map_err(|err| PyRuntimeError::new_err(err.to_string()))?;
        let distances_array = PyArray1::<f32>::from_vec(py, distances)
            .reshape([rows, k])
            .map_err(|err| PyRuntimeError::new_err(err.to_string()))?;

        Ok((
            ids_array.to_owned().into_py(py),
            distances_array.to_owned().into_py(py),
        ))
    }

    fn __len__(&self) -> PyResult<usize> {
        match &self.index {
            Some(BuiltIndex::Prefilter(inner)) => Ok(inner.len()),
            Some(BuiltIndex::Postfilter(inner)) => Ok(inner.len()),
            None => Err(PyRuntimeError::new_err("Index not built yet.")),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "RangeFilterIndex(dimension={}, metric={:?}, variant={}, built={})",
            self.dimension,
            self.metric,
            if self.prefilter { "prefilter" } else { "postfilter" },
            self.index.is_some()
        )
    }
}

#[pymodule]
fn range_ann(_py: Python, module: &PyModule) -> PyResult<()> {
    module.add_class::<PyRangeFilterIndex>()?;
    Ok(())
}
