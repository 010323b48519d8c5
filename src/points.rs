//! Dense point storage and shared contiguous views.

use std::sync::Arc;

use crate::RangeAnnError;

/// Owned, immutable, row-major vector storage.
#[derive(Debug)]
pub struct PointRange {
    data: Vec<f32>,
    num_points: usize,
    dim: usize,
}

impl PointRange {
    /// Wrap a flat row-major buffer of `data.len() / dim` points.
    pub fn new(data: Vec<f32>, dim: usize) -> Result<Self, RangeAnnError> {
        if dim == 0 {
            return Err(RangeAnnError::InvalidConfig(
                "point dimension must be positive",
            ));
        }
        if data.len() % dim != 0 {
            return Err(RangeAnnError::ShapeMismatch {
                expected: (data.len() / dim + 1) * dim,
                got: data.len(),
            });
        }
        let num_points = data.len() / dim;
        Ok(Self {
            data,
            num_points,
            dim,
        })
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Dimension shared by all stored points.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Borrow one point row.
    pub fn point(&self, id: usize) -> &[f32] {
        &self.data[id * self.dim..(id + 1) * self.dim]
    }
}

/// Contiguous read-only view over a shared point store.
///
/// Buckets hold one of these instead of copying their points; the view
/// keeps the sorted store alive and translates bucket-local ids back to
/// sorted-corpus ids.
#[derive(Debug, Clone)]
pub struct SubsetRange {
    store: Arc<PointRange>,
    offset: usize,
    len: usize,
}

impl SubsetRange {
    pub fn new(store: Arc<PointRange>, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= store.len());
        Self { store, offset, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    /// First sorted-corpus id covered by this view.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Borrow the point at a view-local id.
    pub fn point(&self, local: usize) -> &[f32] {
        debug_assert!(local < self.len);
        self.store.point(self.offset + local)
    }

    /// Translate a view-local id to its sorted-corpus id.
    pub fn global_id(&self, local: usize) -> usize {
        self.offset + local
    }
}
