use std::env;
use std::process;
use std::time::Instant;

use rand::prelude::*;

use range_ann::{
    FilterWindow, Metric, Neighbor, PostfilterIndex, PrefilterIndex, QueryParams,
    RangeFilterIndex,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const METHODS: [&str; 3] = ["fenwick_tree", "optimized_postfilter", "three_split"];

struct Config {
    num_points: usize,
    dim: usize,
    num_queries: usize,
    cutoff: usize,
    k: usize,
    beam_size: usize,
    seed: u64,
    variant: String,
}

impl Config {
    fn parse(args: Vec<String>) -> Result<Self, String> {
        let mut config = Self {
            num_points: 20_000,
            dim: 16,
            num_queries: 100,
            cutoff: 1000,
            k: 10,
            beam_size: 100,
            seed: 42,
            variant: "both".to_string(),
        };

        let mut iter = args.into_iter();
        while let Some(flag) = iter.next() {
            let value = iter
                .next()
                .ok_or_else(|| format!("missing value for {flag}"))?;
            match flag.as_str() {
                "--n" => config.num_points = value.parse().map_err(|_| "invalid --n")?,
                "--dim" => config.dim = value.parse().map_err(|_| "invalid --dim")?,
                "--queries" => {
                    config.num_queries = value.parse().map_err(|_| "invalid --queries")?
                }
                "--cutoff" => config.cutoff = value.parse().map_err(|_| "invalid --cutoff")?,
                "--k" => config.k = value.parse().map_err(|_| "invalid --k")?,
                "--beam" => config.beam_size = value.parse().map_err(|_| "invalid --beam")?,
                "--seed" => config.seed = value.parse().map_err(|_| "invalid --seed")?,
                "--variant" => config.variant = value,
                other => return Err(format!("unknown flag {other}")),
            }
        }

        if !matches!(config.variant.as_str(), "prefilter" | "postfilter" | "both") {
            return Err("--variant must be prefilter, postfilter, or both".to_string());
        }
        Ok(config)
    }
}

fn print_usage() {
    println!("Usage: range_bench [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --n <N>          corpus size (default 20000)");
    println!("  --dim <D>        vector dimension (default 16)");
    println!("  --queries <Q>    number of queries (default 100)");
    println!("  --cutoff <C>     minimum bucket size (default 1000)");
    println!("  --k <K>          neighbors per query (default 10)");
    println!("  --beam <B>       graph beam width (default 100)");
    println!("  --seed <S>       RNG seed (default 42)");
    println!("  --variant <V>    prefilter | postfilter | both (default both)");
}

fn main() {
    if env::args().any(|arg| arg == "--help" || arg == "-h") {
        print_usage();
        return;
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match Config::parse(args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}\n");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(err) = run(&config) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

struct Workload {
    points: Vec<Vec<f32>>,
    filters: Vec<f32>,
    queries: Vec<Vec<f32>>,
    windows: Vec<FilterWindow>,
    groundtruth: Vec<Vec<Neighbor>>,
}

fn build_workload(config: &Config) -> Workload {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let points: Vec<Vec<f32>> = (0..config.num_points)
        .map(|_| (0..config.dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect();

    let mut filters: Vec<f32> = (0..config.num_points).map(|i| i as f32).collect();
    filters.shuffle(&mut rng);

    let queries: Vec<Vec<f32>> = (0..config.num_queries)
        .map(|_| (0..config.dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect();

    let max_filter = config.num_points as f32;
    let windows: Vec<FilterWindow> = (0..config.num_queries)
        .map(|_| {
            let width = rng.gen_range(max_filter * 0.02..max_filter * 0.5);
            let lo = rng.gen_range(0.0..max_filter - width);
            FilterWindow::new(lo, lo + width)
        })
        .collect();

    println!(
        "Computing exact ground truth for {} queries...",
        config.num_queries
    );
    let groundtruth: Vec<Vec<Neighbor>> = queries
        .iter()
        .zip(windows.iter())
        .map(|(query, window)| {
            let mut eligible: Vec<Neighbor> = points
                .iter()
                .enumerate()
                .filter(|(id, _)| {
                    let value = filters[*id];
                    window.lo < value && value < window.hi
                })
                .map(|(id, row)| Neighbor {
                    id,
                    distance: Metric::L2.distance(query, row),
                })
                .collect();
            eligible.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
            eligible.truncate(config.k);
            eligible
        })
        .collect();

    Workload {
        points,
        filters,
        queries,
        windows,
        groundtruth,
    }
}

fn evaluate<S: range_ann::SpatialIndex>(
    label: &str,
    config: &Config,
    workload: &Workload,
) -> CliResult<()> {
    println!("\n=== {label} variant ===");
    let start = Instant::now();
    let index = RangeFilterIndex::<S>::build(
        &workload.points,
        &workload.filters,
        config.cutoff,
        Metric::L2,
    )?;
    println!(
        "Built {} points, {} levels in {:.2}s",
        index.len(),
        index.num_levels(),
        start.elapsed().as_secs_f64()
    );

    let mut qp = QueryParams::new(config.k);
    qp.beam_size = config.beam_size;

    for method in METHODS {
        let start = Instant::now();
        let batch = index.batch_search(&workload.queries, &workload.windows, method, &qp)?;
        let elapsed = start.elapsed();

        let mut hits = 0usize;
        let mut total = 0usize;
        for (row, expected) in workload.groundtruth.iter().enumerate() {
            let got = batch.row_ids(row);
            total += expected.len();
            hits += expected
                .iter()
                .filter(|neighbor| got.contains(&(neighbor.id as u32)))
                .count();
        }
        let recall = if total == 0 {
            1.0
        } else {
            hits as f64 / total as f64
        };
        let qps = workload.queries.len() as f64 / elapsed.as_secs_f64();
        println!("  {method:<22} recall@{}: {recall:.4}   QPS: {qps:>10.1}", config.k);
    }
    Ok(())
}

fn run(config: &Config) -> CliResult<()> {
    println!(
        "Corpus: n={}, dim={}, cutoff={}, k={}, seed={}",
        config.num_points, config.dim, config.cutoff, config.k, config.seed
    );
    let workload = build_workload(config);

    if config.variant == "prefilter" || config.variant == "both" {
        evaluate::<PrefilterIndex>("prefilter", config, &workload)?;
    }
    if config.variant == "postfilter" || config.variant == "both" {
        evaluate::<PostfilterIndex>("postfilter", config, &workload)?;
    }
    Ok(())
}
