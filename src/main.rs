//! finpredict - multi-horizon forecast driver
//!
//! # Usage
//! ```sh
//! finpredict predict AAPL MSFT
//! finpredict invalidate '*'
//! finpredict refresh
//! finpredict fit-scaler AAPL
//! ```
//!
//! Configuration is read from the environment (see `config`). Without
//! `REDIS_URL` results are cached in-process only.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finpredict::application::ml::{ReturnScaler, TemporalAligner};
use finpredict::application::serving::{ModelCache, PredictionService, ServiceSettings};
use finpredict::config::Config;
use finpredict::domain::ports::{FeatureStore, ResultStore};
use finpredict::infrastructure::observability::Metrics;
use finpredict::infrastructure::{
    ArtifactLayout, CsvFeatureStore, FsBundleLoader, HttpMarketDataSource, InMemoryResultStore,
    RedisResultStore,
};
use std::fs;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print Prometheus metrics after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forecast one or more symbols and print the JSON results
    Predict {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Drop cached predictions (and loaded models) for a symbol, or '*'
    Invalidate { symbol: String },
    /// Drop every cached prediction, keeping loaded models
    Refresh,
    /// Fit the scaler on the training partition and write scaler.json
    FitScaler { symbol: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!(
        "finpredict {} (models: {:?}, features: {:?}, L={})",
        env!("CARGO_PKG_VERSION"),
        config.pipeline.model_dir,
        config.pipeline.data_dir,
        config.pipeline.sequence_length
    );

    if let Command::FitScaler { symbol } = &cli.command {
        return fit_scaler(&config, symbol);
    }

    let metrics = Metrics::new()?;
    let service = build_service(&config, metrics.clone()).await?;

    match cli.command {
        Command::Predict { symbols } => {
            service.preload(&config.serving.preload_symbols).await;
            for symbol in symbols {
                match service.predict(&symbol).await {
                    Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                    Err(e) => error!("{}: {}", symbol.to_uppercase(), e),
                }
            }
        }
        Command::Invalidate { symbol } => {
            let removed = service.invalidate(&symbol).await?;
            println!("Invalidated {} cached predictions", removed);
        }
        Command::Refresh => {
            let removed = service.refresh().await?;
            println!("Refreshed: cleared {} cached predictions", removed);
        }
        Command::FitScaler { .. } => {}
    }

    if cli.metrics {
        print!("{}", metrics.render());
    }
    Ok(())
}

async fn build_service(config: &Config, metrics: Metrics) -> Result<PredictionService> {
    let results: Arc<dyn ResultStore> = match &config.serving.redis_url {
        Some(url) => Arc::new(RedisResultStore::connect(url).await?),
        None => {
            info!("REDIS_URL not set, using in-process result cache");
            Arc::new(InMemoryResultStore::new())
        }
    };

    let loader = FsBundleLoader::new(ArtifactLayout::new(&config.pipeline.model_dir));
    let models = Arc::new(ModelCache::with_metrics(
        Arc::new(loader),
        config.serving.model_cache_capacity,
        metrics.clone(),
    ));
    let features: Arc<dyn FeatureStore> =
        Arc::new(CsvFeatureStore::new(&config.pipeline.data_dir));

    let settings = ServiceSettings {
        inference_permits: config.serving.inference_permits,
        result_ttl: config.serving.result_cache_ttl,
        market_data_timeout: config.serving.market_data_timeout,
    };
    let mut service = PredictionService::new(
        models,
        TemporalAligner::new(config.pipeline.sequence_length),
        features,
        results,
        settings,
    )
    .with_metrics(metrics);

    if let Some(url) = &config.serving.market_data_url {
        info!("Live features from {}", url);
        service = service.with_market_data(Arc::new(HttpMarketDataSource::new(
            url.clone(),
            config.serving.market_data_timeout,
        )));
    }
    Ok(service)
}

fn fit_scaler(config: &Config, symbol: &str) -> Result<()> {
    let store = CsvFeatureStore::new(&config.pipeline.data_dir);
    let table = store
        .load_features(symbol)
        .with_context(|| format!("Failed to load features for {}", symbol))?;
    let (train, _, _) =
        table.split_chronological(config.pipeline.train_split, config.pipeline.validation_split);

    let mut scaler = ReturnScaler::new();
    scaler.fit_table(&train)?;

    let layout = ArtifactLayout::new(&config.pipeline.model_dir);
    fs::create_dir_all(layout.symbol_dir(symbol)).context("Failed to create model directory")?;
    scaler.save(&layout.scaler(symbol))?;
    println!(
        "Fitted scaler for {} on {} training rows",
        symbol.to_uppercase(),
        train.len()
    );
    Ok(())
}
