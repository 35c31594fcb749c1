//! Grove trainer CLI.
//!
//! Trains a GBDT model from a CSV dataset and writes the model as
//! canonical JSON next to its blake3 hash, so reruns can be verified
//! byte-for-byte.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use grove_core::params::{InternalConfig, TreeParam};
use grove_trainer::{dataset, train};

#[derive(Parser, Debug)]
#[command(name = "grove-train")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pipeline-parallel GBDT trainer", long_about = None)]
struct Args {
    /// Input CSV dataset path (last column is the target)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for model and hash
    #[arg(short, long, default_value = "models/grove")]
    output: PathBuf,

    /// Number of boosting rounds
    #[arg(long, default_value = "32")]
    rounds: usize,

    /// Tree depth (depth - 1 splitting levels)
    #[arg(long, default_value = "6")]
    depth: usize,

    /// Training objective: linear, logistic or softmax
    #[arg(long, default_value = "linear")]
    objective: String,

    /// Label classes (softmax only)
    #[arg(long, default_value = "1")]
    labels_count: usize,

    /// Minimum rows per child
    #[arg(long, default_value = "1")]
    min_leaf_size: usize,

    /// Minimum summed hessian per child
    #[arg(long, default_value = "1.0")]
    min_child_weight: f64,

    /// L2 regularization on leaf weights
    #[arg(long, default_value = "0.0")]
    lambda: f64,

    /// L1 regularization on leaf weights
    #[arg(long, default_value = "0.0")]
    alpha: f64,

    /// Learning rate
    #[arg(long, default_value = "0.3")]
    eta: f64,

    /// Column fraction sampled per tree, in (0, 1]
    #[arg(long, default_value = "1.0")]
    colsample_bytree: f64,

    /// Column fraction sampled per level, in (0, 1]
    #[arg(long, default_value = "1.0")]
    colsample_bylevel: f64,

    /// Base score
    #[arg(long, default_value = "0.5")]
    initial_y: f64,

    /// Seed for column sampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Feature passes in flight (pipeline depth)
    #[arg(long, default_value = "2")]
    overlap: usize,

    /// Accumulate gradients in double precision
    #[arg(long)]
    double_precision: bool,

    /// Keep all-binary columns dense instead of detecting them as sparse
    #[arg(long)]
    no_sparse_detection: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Grove GBDT trainer v{}", env!("CARGO_PKG_VERSION"));

    info!("loading dataset from {}", args.input.display());
    let loaded = dataset::load_csv(&args.input, !args.no_sparse_detection)
        .context("failed to load dataset")?;
    info!(
        "loaded {} rows, {} dense + {} sparse features",
        loaded.matrix.rows(),
        loaded.matrix.columns_dense(),
        loaded.matrix.columns_sparse()
    );
    for fid in 0..loaded.matrix.columns_dense() {
        let values = loaded.matrix.dense(fid).values.as_slice();
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        tracing::debug!(fid, min, max, "dense feature range");
    }

    let params = TreeParam {
        depth: args.depth,
        min_leaf_size: args.min_leaf_size,
        min_child_weight: args.min_child_weight,
        gamma: 0.0,
        lambda: args.lambda,
        alpha: args.alpha,
        eta: args.eta,
        colsample_bytree: args.colsample_bytree,
        colsample_bylevel: args.colsample_bylevel,
        initial_y: args.initial_y,
        labels_count: args.labels_count,
        objective: args.objective.parse()?,
        rounds: args.rounds,
    };
    let config = InternalConfig {
        seed: args.seed,
        overlap: args.overlap,
        double_precision: args.double_precision,
    };

    let model = train(&loaded.matrix, &loaded.labels, &params, &config)
        .context("training failed")?;
    info!("trained {} trees", model.num_trees());

    std::fs::create_dir_all(&args.output).context("failed to create output directory")?;

    let model_path = args.output.join("model.json");
    let json = model
        .to_canonical_json()
        .context("failed to serialize model")?;
    std::fs::write(&model_path, &json).context("failed to write model file")?;

    let hash_hex = hex::encode(blake3::hash(json.as_bytes()).as_bytes());
    let hash_path = args.output.join("model.hash");
    std::fs::write(&hash_path, &hash_hex).context("failed to write hash file")?;

    info!("model written to {}", model_path.display());
    info!("model hash {hash_hex}");
    Ok(())
}
