use rand::prelude::*;

use crate::graph::PostfilterIndex;
use crate::index::RangeFilterIndex;
use crate::params::{QueryMethod, QueryParams};
use crate::planner;
use crate::spatial::PrefilterIndex;
use crate::topk::Neighbor;
use crate::{FilterWindow, Metric, RangeAnnError};

const ALL_METHODS: [QueryMethod; 3] = [
    QueryMethod::FenwickTree,
    QueryMethod::OptimizedPostfilter,
    QueryMethod::ThreeSplit,
];

fn random_points(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

fn sequential_filters(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32).collect()
}

fn shuffled_filters(n: usize, seed: u64) -> Vec<f32> {
    let mut filters = sequential_filters(n);
    let mut rng = StdRng::seed_from_u64(seed);
    filters.shuffle(&mut rng);
    filters
}

/// Exact filtered k-NN over the original input, using the same window
/// resolution semantics as the index.
fn exact_reference(
    points: &[Vec<f32>],
    filters: &[f32],
    query: &[f32],
    window: FilterWindow,
    k: usize,
    metric: Metric,
) -> Vec<Neighbor> {
    let mut eligible: Vec<Neighbor> = points
        .iter()
        .enumerate()
        .filter(|(id, _)| {
            let value = filters[*id];
            window.lo < value && value < window.hi
        })
        .map(|(id, row)| Neighbor {
            id,
            distance: metric.distance(query, row),
        })
        .collect();
    eligible.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    eligible.truncate(k);
    eligible
}

// --- tiny corpus, brute force only ---------------------------------------

#[test]
fn tiny_corpus_is_served_by_brute_force() {
    let points = vec![
        vec![0.0f32, 0.0],
        vec![1.0, 0.0],
        vec![2.0, 0.0],
        vec![3.0, 0.0],
        vec![4.0, 0.0],
    ];
    let filters = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 1000, Metric::L2).unwrap();
    assert_eq!(index.num_levels(), 0, "cutoff >= 2n must produce no levels");

    let qp = QueryParams::new(2);
    let window = FilterWindow::new(1.5, 4.5);
    for method in ALL_METHODS {
        let results = index.search(&[0.1, 0.0], window, method, &qp).unwrap();
        let ids: Vec<usize> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2], "wrong ids from {}", method.name());
        assert!((results[0].distance - 0.9).abs() < 1e-6);
        assert!((results[1].distance - 1.9).abs() < 1e-6);
    }
}

// --- single-bucket routing -------------------------------------------------

#[test]
fn exact_fit_routes_to_one_level_zero_bucket() {
    let n = 2000;
    let points = random_points(n, 4, 42);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 500, Metric::L2)
            .unwrap();
    assert_eq!(index.bucket_sizes(), &[500, 1000, 2000]);

    let qp = QueryParams::new(10);
    let window = FilterWindow::new(0.0, 499.0);
    let span = index.resolve_window(window);
    assert_eq!(span, (1, 499));

    let route = index.route_single_bucket(span, &qp).expect("route must exist");
    assert_eq!((route.level, route.bucket), (0, 0), "expected level-0 bucket 0");

    let optimized = index.optimized_postfiltering_search(&points[0], window, &qp);
    let fenwick = index.fenwick_tree_search(&points[0], window, &qp);
    assert_eq!(optimized, fenwick, "exact variants must agree on this window");
}

// --- straddling window -----------------------------------------------------

#[test]
fn straddling_window_plans_bucket_plus_tails() {
    let n = 2000;
    let points = random_points(n, 4, 43);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 500, Metric::L2)
            .unwrap();

    let window = FilterWindow::new(250.0, 1050.0);
    let span = index.resolve_window(window);
    assert_eq!(span, (251, 1050));

    let plan = planner::dyadic_cover(span, index.bucket_sizes());
    assert_eq!(plan.buckets.len(), 1);
    assert_eq!(plan.buckets[0].level, 0);
    assert_eq!((plan.buckets[0].start, plan.buckets[0].end), (500, 1000));
    assert_eq!(plan.tails(), [(251, 500), (1000, 1050)]);

    let qp = QueryParams::new(25);
    let results = index.fenwick_tree_search(&points[7], window, &qp);
    assert_eq!(results.len(), 25);
    for candidate in &results {
        assert!(
            candidate.id >= 251 && candidate.id < 1050,
            "sorted id {} escapes the window span",
            candidate.id
        );
    }
}

// --- empty window ----------------------------------------------------------

#[test]
fn empty_window_yields_padded_row() {
    let n = 2000;
    let points = random_points(n, 4, 44);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 500, Metric::L2)
            .unwrap();

    let qp = QueryParams::new(5);
    let windows = [FilterWindow::new(10_000.0, 20_000.0)];
    let queries = vec![points[0].clone()];
    let batch = index
        .batch_search(&queries, &windows, "fenwick_tree", &qp)
        .unwrap();

    assert_eq!(batch.row_ids(0), &[0, 0, 0, 0, 0]);
    assert!(batch.row_distances(0).iter().all(|d| d.is_infinite()));
}

#[test]
fn in_range_window_matching_nothing_is_empty_not_an_error() {
    let n = 2000;
    let points = random_points(n, 4, 45);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 500, Metric::L2)
            .unwrap();

    let qp = QueryParams::new(5);
    // strictly between two adjacent integer filter values
    let window = FilterWindow::new(250.2, 250.8);
    for method in ALL_METHODS {
        let results = index.search(&points[0], window, method, &qp).unwrap();
        assert!(results.is_empty(), "{} returned phantom results", method.name());
    }
}

// --- three-way split -------------------------------------------------------

#[test]
fn three_split_covers_the_span_exactly() {
    let n = 2000;
    let points = random_points(n, 4, 46);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 500, Metric::L2)
            .unwrap();

    let window = FilterWindow::new(250.0, 1349.0);
    let span = index.resolve_window(window);
    assert_eq!(span, (251, 1349));

    let center =
        planner::largest_contained_bucket(span, index.bucket_sizes(), index.len()).unwrap();
    assert_eq!((center.level, center.bucket), (0, 1));

    let qp = QueryParams::new(1200);
    let results = index.three_split_search(&points[3], window, &qp);
    let mut ids: Vec<usize> = results.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    let expected: Vec<usize> = (251..1349).collect();
    assert_eq!(ids, expected, "three-way split must cover the span exactly once");
}

#[test]
fn three_split_with_whole_corpus_window_uses_top_bucket() {
    let n = 2000;
    let points = random_points(n, 4, 47);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 500, Metric::L2)
            .unwrap();

    let window = FilterWindow::new(-1.0, 2000.5);
    let span = index.resolve_window(window);
    assert_eq!(span, (0, 2000));

    let center =
        planner::largest_contained_bucket(span, index.bucket_sizes(), index.len()).unwrap();
    assert_eq!((center.start, center.end), (0, 2000));

    let qp = QueryParams::new(10);
    let split = index.three_split_search(&points[5], window, &qp);
    let fenwick = index.fenwick_tree_search(&points[5], window, &qp);
    assert_eq!(split, fenwick);
}

// --- ratio fallback --------------------------------------------------------

#[test]
fn loose_bucket_falls_back_to_dyadic_strategy() {
    let n = 8192;
    let points = random_points(n, 4, 48);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 256, Metric::L2)
            .unwrap();

    let window = FilterWindow::new(2000.0, 2100.0);
    let span = index.resolve_window(window);
    assert_eq!(span, (2001, 2100));

    let unconstrained = QueryParams::new(10);
    let route = index
        .route_single_bucket(span, &unconstrained)
        .expect("containing bucket must exist");
    assert_eq!(index.bucket_sizes()[route.level], 4096);

    let mut constrained = QueryParams::new(10);
    constrained.min_query_to_bucket_ratio = Some(1.5);
    assert_eq!(
        index.route_single_bucket(span, &constrained),
        None,
        "a 4096-sized bucket is too loose for a 99-element span at ratio 1.5"
    );

    let optimized = index.optimized_postfiltering_search(&points[1], window, &constrained);
    let fenwick = index.fenwick_tree_search(&points[1], window, &constrained);
    assert_eq!(optimized, fenwick, "fallback must reproduce the dyadic strategy");
}

#[test]
fn narrow_windows_skip_single_bucket_routing() {
    let n = 2000;
    let points = random_points(n, 4, 49);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &sequential_filters(n), 500, Metric::L2)
            .unwrap();

    // 4 * width < cutoff
    let span = index.resolve_window(FilterWindow::new(100.0, 180.0));
    assert_eq!(index.route_single_bucket(span, &QueryParams::new(5)), None);
}

// --- window resolution property --------------------------------------------

#[test]
fn window_resolution_matches_value_predicate() {
    let n = 500;
    let points = random_points(n, 3, 50);
    let mut rng = StdRng::seed_from_u64(51);
    // coarse values so duplicates occur
    let filters: Vec<f32> = (0..n).map(|_| rng.gen_range(0..50) as f32).collect();
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 64, Metric::L2).unwrap();

    let sorted = index.filter_values();
    for _ in 0..300 {
        let a = rng.gen_range(-5.0f32..55.0);
        let b = rng.gen_range(-5.0f32..55.0);
        let window = FilterWindow::new(a.min(b), a.max(b));
        let (start, end) = index.resolve_window(window);

        for &value in &sorted[..start] {
            assert!(value <= window.lo);
        }
        for &value in &sorted[start..end] {
            assert!(window.lo < value && value < window.hi);
        }
        for &value in &sorted[end..] {
            assert!(value >= window.hi);
        }
    }
}

// --- determinism -----------------------------------------------------------

#[test]
fn repeated_and_rebuilt_queries_are_bit_identical() {
    let n = 600;
    let dim = 6;
    let points = random_points(n, dim, 52);
    let filters = shuffled_filters(n, 53);

    let first =
        RangeFilterIndex::<PostfilterIndex>::build(&points, &filters, 64, Metric::L2).unwrap();
    let second =
        RangeFilterIndex::<PostfilterIndex>::build(&points, &filters, 64, Metric::L2).unwrap();

    let qp = QueryParams::new(10);
    let queries = random_points(8, dim, 54);
    for (i, query) in queries.iter().enumerate() {
        let window = FilterWindow::new(40.0 + i as f32, 480.0 + i as f32);
        for method in ALL_METHODS {
            let a = first.search(query, window, method, &qp).unwrap();
            let b = first.search(query, window, method, &qp).unwrap();
            let c = second.search(query, window, method, &qp).unwrap();
            assert_eq!(a, b, "{} is not idempotent", method.name());
            assert_eq!(a, c, "{} differs across identical builds", method.name());
        }
    }
}

#[test]
fn batch_rows_match_single_queries() {
    let n = 2000;
    let dim = 4;
    let points = random_points(n, dim, 55);
    let filters = shuffled_filters(n, 56);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 500, Metric::L2).unwrap();

    let qp = QueryParams::new(7);
    let queries = random_points(10, dim, 57);
    let windows: Vec<FilterWindow> = (0..10)
        .map(|i| FilterWindow::new(i as f32 * 50.0, 900.0 + i as f32 * 100.0))
        .collect();

    let batch = index
        .batch_search(&queries, &windows, "three_split", &qp)
        .unwrap();

    for row in 0..queries.len() {
        let single = index
            .search(&queries[row], windows[row], QueryMethod::ThreeSplit, &qp)
            .unwrap();
        let ids = batch.row_ids(row);
        let distances = batch.row_distances(row);
        for slot in 0..qp.k {
            if slot < single.len() {
                assert_eq!(ids[slot], single[slot].id as u32);
                assert_eq!(distances[slot], single[slot].distance);
            } else {
                assert_eq!(ids[slot], 0);
                assert!(distances[slot].is_infinite());
            }
        }
    }
}

// --- output ordering -------------------------------------------------------

#[test]
fn results_are_sorted_and_free_of_duplicates() {
    let n = 3000;
    let dim = 6;
    let points = random_points(n, dim, 58);
    let filters = shuffled_filters(n, 59);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 200, Metric::L2).unwrap();

    let mut rng = StdRng::seed_from_u64(60);
    let qp = QueryParams::new(20);
    for _ in 0..30 {
        let query: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>()).collect();
        let a = rng.gen_range(0.0f32..3000.0);
        let b = rng.gen_range(0.0f32..3000.0);
        let window = FilterWindow::new(a.min(b), a.max(b));
        for method in ALL_METHODS {
            let results = index.search(&query, window, method, &qp).unwrap();
            assert!(results.len() <= qp.k);
            for pair in results.windows(2) {
                assert!(
                    pair[0].distance <= pair[1].distance,
                    "{} output out of order",
                    method.name()
                );
            }
            let mut ids: Vec<usize> = results.iter().map(|r| r.id).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), results.len(), "{} returned duplicates", method.name());
        }
    }
}

// --- recall against the exact reference ------------------------------------

#[test]
fn prefilter_variant_is_exact_on_a_large_corpus() {
    let n = 10_000;
    let dim = 8;
    let points = random_points(n, dim, 61);
    let filters = shuffled_filters(n, 62);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 1000, Metric::L2).unwrap();

    let mut rng = StdRng::seed_from_u64(63);
    let qp = QueryParams::new(10);
    for _ in 0..25 {
        let query: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
        let lo = rng.gen_range(0.0f32..8000.0);
        let width = rng.gen_range(200.0f32..2000.0);
        let window = FilterWindow::new(lo, lo + width);
        let expected = exact_reference(&points, &filters, &query, window, qp.k, Metric::L2);

        for method in ALL_METHODS {
            let got = index.search(&query, window, method, &qp).unwrap();
            let got_ids: Vec<usize> = got.iter().map(|r| r.id).collect();
            let expected_ids: Vec<usize> = expected.iter().map(|r| r.id).collect();
            assert_eq!(
                got_ids,
                expected_ids,
                "{} diverged from the exact reference",
                method.name()
            );
        }
    }
}

#[test]
fn postfilter_variant_meets_the_recall_floor() {
    let n = 1024;
    let dim = 8;
    let points = random_points(n, dim, 64);
    let filters = sequential_filters(n);
    let index =
        RangeFilterIndex::<PostfilterIndex>::build(&points, &filters, 128, Metric::L2).unwrap();

    let mut qp = QueryParams::new(10);
    qp.beam_size = 512;
    qp.postfiltering_max_beam = 4096;

    let mut rng = StdRng::seed_from_u64(65);
    for method in ALL_METHODS {
        let mut hits = 0usize;
        let mut total = 0usize;
        for _ in 0..15 {
            let query: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
            let lo = rng.gen_range(0.0f32..500.0);
            let window = FilterWindow::new(lo, lo + 400.0);
            let expected = exact_reference(&points, &filters, &query, window, qp.k, Metric::L2);
            let got = index.search(&query, window, method, &qp).unwrap();

            total += expected.len();
            hits += got
                .iter()
                .filter(|r| expected.iter().any(|e| e.id == r.id))
                .count();
        }
        let recall = hits as f32 / total as f32;
        assert!(
            recall >= 0.8,
            "{} recall {recall:.3} below floor",
            method.name()
        );
    }
}

// --- inner-product metric ---------------------------------------------------

#[test]
fn inner_product_orders_by_similarity() {
    let n = 400;
    let dim = 4;
    let points = random_points(n, dim, 66);
    let filters = sequential_filters(n);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 100, Metric::InnerProduct)
            .unwrap();

    let qp = QueryParams::new(5);
    let query = vec![0.3f32, -0.2, 0.8, 0.1];
    let window = FilterWindow::new(50.0, 350.0);
    let got = index.search(&query, window, QueryMethod::FenwickTree, &qp).unwrap();
    let expected = exact_reference(&points, &filters, &query, window, qp.k, Metric::InnerProduct);
    let got_ids: Vec<usize> = got.iter().map(|r| r.id).collect();
    let expected_ids: Vec<usize> = expected.iter().map(|r| r.id).collect();
    assert_eq!(got_ids, expected_ids);
}

// --- error paths ------------------------------------------------------------

#[test]
fn shape_and_method_errors_surface() {
    let points = random_points(100, 4, 67);
    let filters = sequential_filters(100);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 50, Metric::L2).unwrap();
    let qp = QueryParams::new(3);
    let window = FilterWindow::new(0.0, 50.0);

    assert_eq!(
        index
            .batch_search(&[vec![0.0; 4]], &[window], "simulated_annealing", &qp)
            .unwrap_err(),
        RangeAnnError::UnknownMethod("simulated_annealing".to_string())
    );

    assert_eq!(
        index
            .batch_search(&[vec![0.0; 4]], &[window, window], "fenwick_tree", &qp)
            .unwrap_err(),
        RangeAnnError::ShapeMismatch { expected: 1, got: 2 }
    );

    assert_eq!(
        index
            .batch_search(&[vec![0.0; 3]], &[window], "fenwick_tree", &qp)
            .unwrap_err(),
        RangeAnnError::ShapeMismatch { expected: 4, got: 3 }
    );

    assert_eq!(
        index
            .search(&[0.0; 5], window, QueryMethod::FenwickTree, &qp)
            .unwrap_err(),
        RangeAnnError::ShapeMismatch { expected: 4, got: 5 }
    );

    assert_eq!(
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 0, Metric::L2).unwrap_err(),
        RangeAnnError::InvalidConfig("cutoff must be positive")
    );
}

#[test]
fn remapper_translates_back_to_input_ids() {
    let n = 300;
    let points = random_points(n, 4, 68);
    let filters = shuffled_filters(n, 69);
    let index =
        RangeFilterIndex::<PrefilterIndex>::build(&points, &filters, 64, Metric::L2).unwrap();

    let corpus = index.corpus();
    let mut seen = vec![false; n];
    for sorted_id in 0..n {
        let original = corpus.original_id(sorted_id);
        assert!(!seen[original]);
        seen[original] = true;
        assert_eq!(corpus.filter_value(sorted_id), filters[original]);
        assert_eq!(corpus.points().point(sorted_id), points[original].as_slice());
    }
}
