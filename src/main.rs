use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crypto_price_predictor::config::{load_config, write_default_config, AppConfig, LoggingSettings};
use crypto_price_predictor::database::Database;
use crypto_price_predictor::engine::{require_bars, Predictor, Scheduler};
use crypto_price_predictor::exchange::{BinanceClient, BinanceWebSocket};
use crypto_price_predictor::ingest::{Collector, HttpCollector, Ingestor, NoopCollector};
use crypto_price_predictor::ml::ModelTrainer;
use crypto_price_predictor::store::NdjsonTradeStore;

#[derive(Parser)]
#[command(name = "crypto-price-predictor")]
#[command(version)]
#[command(about = "Binance trade ingestion and next-bar price prediction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream trades for every configured symbol into the trade logs
    Ingest,
    /// Make a single prediction and exit
    Predict,
    /// Run the prediction loop
    Run {
        /// Seconds between predictions (defaults to scheduler.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
        /// Number of predictions to make (defaults to scheduler.max_predictions)
        #[arg(short = 'n', long)]
        predictions: Option<u32>,
        /// Keep predicting until stopped
        #[arg(long)]
        forever: bool,
    },
    /// Check the trade store and prediction store, then exit
    TestConnection,
    /// Write the default configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    if let Commands::InitConfig { output } = &cli.command {
        init_logging(&LoggingSettings::default(), cli.verbose)?;
        return write_default_config(output);
    }

    let config = load_config(Some(&cli.config))?;
    init_logging(&config.logging, cli.verbose)?;

    info!("Crypto Price Predictor v{}", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping...");
            let _ = shutdown_tx.send(true);
        }
    });

    match cli.command {
        Commands::Ingest => run_ingest(&config, shutdown_rx).await?,
        Commands::Predict => run_single(&config).await?,
        Commands::Run { interval, predictions, forever } => {
            run_loop(&config, interval, predictions, forever, shutdown_rx).await?
        }
        Commands::TestConnection => test_connection(&config).await?,
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn init_logging(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    // RUST_LOG wins over the configured level; --verbose wins over both.
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if settings.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn run_ingest(config: &AppConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let connector = Arc::new(BinanceWebSocket::new(config.stream.websocket_url.clone()));

    let collector: Arc<dyn Collector> = if config.collector.enabled {
        info!("Forwarding trades to {}", config.collector.url);
        Arc::new(HttpCollector::new(
            config.collector.url.clone(),
            Duration::from_secs(config.collector.timeout_secs),
        )?)
    } else {
        Arc::new(NoopCollector)
    };

    let mut ingestor = Ingestor::new(config.ingest_settings(), connector, collector);
    if config.depth.enabled {
        info!("Order book enrichment enabled (top {} levels)", config.depth.limit);
        ingestor = ingestor.with_depth(BinanceClient::public_only(
            config.depth.rest_url.clone(),
            Duration::from_secs(config.depth.timeout_secs),
        )?);
    }

    let handles = ingestor.spawn(&config.stream.symbols, shutdown).await?;
    info!(
        "Streaming {} symbols into {}. Press Ctrl+C to stop.",
        handles.len(),
        config.stream.data_dir.display()
    );

    for (pair, handle) in handles {
        match handle.await {
            Ok(stats) => info!(
                "{}: {} records written, {} duplicates skipped, {} parse failures, {} collector failures",
                pair,
                stats.records_written,
                stats.duplicates_skipped,
                stats.parse_failures,
                stats.collector_failures
            ),
            Err(e) => error!("Ingest task for {} panicked: {}", pair, e),
        }
    }

    Ok(())
}

async fn build_predictor(config: &AppConfig) -> Predictor {
    let store = Arc::new(NdjsonTradeStore::new(config.stream.data_dir.clone()));
    let trainer = ModelTrainer::new(config.model.trainer_config());
    let predictor = Predictor::new(store, trainer, config.predictor_settings());

    if !config.persistence.enabled {
        return predictor;
    }
    match Database::new(&config.persistence.database_url).await {
        Ok(db) => predictor.with_sink(Arc::new(db)),
        Err(e) => {
            warn!("Prediction store unavailable, continuing without persistence: {}", e);
            predictor
        }
    }
}

async fn run_single(config: &AppConfig) -> Result<()> {
    let mut predictor = build_predictor(config).await;
    predictor.connect().await?;

    let bars = predictor.get_latest_bars().await?;
    if let Err(e) = require_bars(&bars, config.scheduler.min_bars) {
        warn!("Not enough data to predict: {}", e);
        return Ok(());
    }

    predictor.predict(&bars).await?;
    predictor.flush_history().await?;
    Ok(())
}

async fn run_loop(
    config: &AppConfig,
    interval: Option<u64>,
    predictions: Option<u32>,
    forever: bool,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let interval = Duration::from_secs(interval.unwrap_or(config.scheduler.interval_secs).max(1));
    let max_cycles = if forever {
        None
    } else {
        predictions.or(config.scheduler.max_predictions)
    };

    let mut predictor = build_predictor(config).await;
    predictor.connect().await?;

    let summary = Scheduler::new(&mut predictor, config.scheduler.min_bars, shutdown)
        .run_loop(interval, max_cycles)
        .await;

    info!(
        "Done in {:.1}s: {} predictions over {} cycles",
        summary.elapsed.as_secs_f64(),
        summary.predictions,
        summary.cycles
    );
    if let Some(path) = &summary.history_file {
        info!("History saved to {}", path.display());
    }
    Ok(())
}

async fn test_connection(config: &AppConfig) -> Result<()> {
    let mut predictor = build_predictor(config).await;
    let info = predictor.connect().await?;

    info!("Trade store OK: {} ({} logs, {} bytes)", info.store.location, info.store.log_files, info.store.total_bytes);
    if info.persistence {
        info!("Prediction store OK: {}", config.persistence.database_url);
    } else {
        warn!("Prediction store not available, predictions will not be persisted");
    }
    Ok(())
}
