//! Learn per-horizon ensemble weights on the validation partition.
//!
//! Loads the symbol's bundle, checks that sequence and tabular targets line
//! up on every shared date, grid-searches the blend weight per horizon and
//! writes `ensemble_weights.json` next to the models.

use anyhow::{Context, Result};
use clap::Parser;
use finpredict::application::ml::TemporalAligner;
use finpredict::application::serving::BundleLoader;
use finpredict::config::Config;
use finpredict::domain::ports::FeatureStore;
use finpredict::infrastructure::{ArtifactLayout, CsvFeatureStore, FsBundleLoader};
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

/// Tolerance for sequence/tabular target agreement on raw returns.
const ALIGNMENT_TOLERANCE: f64 = 1e-9;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Symbol to optimize
    symbol: String,

    /// Override SEQUENCE_LENGTH
    #[arg(long)]
    sequence_length: Option<usize>,

    /// Report weights without writing the file
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let symbol = cli.symbol.to_uppercase();
    let aligner =
        TemporalAligner::new(cli.sequence_length.unwrap_or(config.pipeline.sequence_length));

    let table = CsvFeatureStore::new(&config.pipeline.data_dir)
        .load_features(&symbol)
        .with_context(|| format!("Failed to load features for {}", symbol))?;
    let (_, validation, _) =
        table.split_chronological(config.pipeline.train_split, config.pipeline.validation_split);
    info!(
        "{}: {} rows, {} in validation partition",
        symbol,
        table.len(),
        validation.len()
    );

    let layout = ArtifactLayout::new(&config.pipeline.model_dir);
    let bundle = FsBundleLoader::new(layout.clone())
        .load(&symbol)
        .with_context(|| format!("Failed to load models for {}", symbol))?;
    let scaler = bundle.scaler();

    let raw_sequence = aligner.sequence_samples(&validation)?;
    let tabular = aligner.tabular_samples_by_horizon(&validation)?;
    for (horizon, samples) in &tabular {
        let compared =
            TemporalAligner::verify_alignment(&raw_sequence, samples, *horizon, ALIGNMENT_TOLERANCE)?;
        info!("{}: {} targets aligned", horizon, compared);
    }

    let scaled = scaler.transform_table(&validation)?;
    let sequence = aligner.sequence_samples(&scaled)?;
    let weights = bundle
        .combiner()
        .optimize_weights(bundle.models(), scaler, &sequence, &tabular)?;

    for (horizon, pair) in &weights.optimized {
        println!("{}: sequence={:.2} tree={:.2}", horizon, pair.sequence, pair.tree);
    }

    if cli.dry_run {
        info!("Dry run, weights not written");
    } else {
        weights.save(&layout.weights(&symbol))?;
    }
    Ok(())
}
