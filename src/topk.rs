//! Bounded top-k selection with a deterministic total order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A candidate neighbor: an id paired with its distance to the query.
///
/// Inside the index the id is a sorted-corpus id; the outermost result
/// boundary remaps it to the original input id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy)]
struct HeapItem {
    distance: f32,
    id: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.distance.to_bits() == other.distance.to_bits() && self.id == other.id
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Max-heap keeping the k best (smallest-distance) candidates seen so far.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<HeapItem>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Worst retained distance, once k candidates are held.
    pub fn threshold(&self) -> Option<f32> {
        if self.heap.len() < self.k {
            None
        } else {
            self.heap.peek().map(|item| item.distance)
        }
    }

    pub fn push(&mut self, id: usize, distance: f32) {
        if self.k == 0 {
            return;
        }
        let item = HeapItem { distance, id };
        if self.heap.len() < self.k {
            self.heap.push(item);
            return;
        }
        if let Some(top) = self.heap.peek() {
            if item.cmp(top) == Ordering::Less {
                self.heap.pop();
                self.heap.push(item);
            }
        }
    }

    /// Drain into a vector ascending by (distance, id).
    pub fn into_sorted(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|item| Neighbor {
                id: item.id,
                distance: item.distance,
            })
            .collect()
    }
}

/// Sort candidates by the (distance, id) total order used for all final
/// results.
pub fn sort_by_distance(candidates: &mut Vec<Neighbor>) {
    candidates.sort_unstable_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.id.cmp(&b.id))
    });
}
