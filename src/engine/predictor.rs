use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bars::BarAggregator;
use crate::database::PredictionSink;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::{FeatureRow, ModelTrainer};
use crate::store::{StoreInfo, TradeStore};
use crate::types::{BarSeries, Prediction, PredictionDocument, TimeFrame, TradingPair};

#[derive(Debug, Clone)]
pub struct PredictorSettings {
    pub symbol: TradingPair,
    pub timeframe: TimeFrame,
    pub lookback: chrono::Duration,
    pub max_records: usize,
    pub interval_secs: u64,
    pub persist_timeout: Duration,
    pub history_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub store: StoreInfo,
    pub persistence: bool,
}

pub type ConnectionResult = PipelineResult<ConnectionInfo>;

/// Retrains from scratch and predicts the next close on every call.
pub struct Predictor {
    store: Arc<dyn TradeStore>,
    aggregator: BarAggregator,
    trainer: ModelTrainer,
    sink: Option<Arc<dyn PredictionSink>>,
    settings: PredictorSettings,
    history: Vec<Prediction>,
    connected: bool,
    persistence_ready: bool,
}

impl Predictor {
    pub fn new(store: Arc<dyn TradeStore>, trainer: ModelTrainer, settings: PredictorSettings) -> Self {
        let aggregator = BarAggregator::new(store.clone(), settings.timeframe);
        Self {
            store,
            aggregator,
            trainer,
            sink: None,
            settings,
            history: Vec::new(),
            connected: false,
            persistence_ready: false,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PredictionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn settings(&self) -> &PredictorSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn history(&self) -> &[Prediction] {
        &self.history
    }

    /// Checks the trade store and readies the prediction store. An unreachable
    /// prediction store only disables persistence.
    pub async fn connect(&mut self) -> ConnectionResult {
        let store = self
            .store
            .ping()
            .await
            .map_err(|e| PipelineError::ConnectionFailure(e.to_string()))?;
        info!(
            "Connected to trade store at {} ({} logs, {} bytes)",
            store.location, store.log_files, store.total_bytes
        );

        self.persistence_ready = match &self.sink {
            Some(sink) => match sink.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Prediction store unavailable, predictions will not be persisted: {}", e);
                    false
                }
            },
            None => false,
        };
        self.connected = true;

        Ok(ConnectionInfo {
            store,
            persistence: self.persistence_ready,
        })
    }

    pub async fn get_bars(&self, lookback: chrono::Duration, limit: usize) -> PipelineResult<BarSeries> {
        self.aggregator
            .get_bars(self.settings.symbol, lookback, limit)
            .await
            .map_err(|e| PipelineError::ConnectionFailure(e.to_string()))
    }

    /// Bars for the configured lookback and record limit.
    pub async fn get_latest_bars(&self) -> PipelineResult<BarSeries> {
        self.get_bars(self.settings.lookback, self.settings.max_records).await
    }

    /// Trains on `bars` and predicts the next close. A series the trainer
    /// cannot use, too short included, is a `TrainingFailure`.
    pub async fn predict(&mut self, bars: &BarSeries) -> PipelineResult<Prediction> {
        let closes = bars.closes_f64();

        // CPU-bound fit runs on the blocking pool; awaiting it keeps cycles serialized.
        let trainer = self.trainer.clone();
        let series = closes.clone();
        let (report, next) = tokio::task::spawn_blocking(move || {
            let report = trainer.train(&series);
            let next = report.artifact.as_ref().map(|a| a.predict_next(&series));
            (report, next)
        })
        .await
        .map_err(|e| PipelineError::TrainingFailure(format!("training task aborted: {}", e)))?;

        let predicted = match next {
            Some(Ok(price)) => price,
            Some(Err(e)) => return Err(PipelineError::TrainingFailure(e.to_string())),
            None => {
                return Err(PipelineError::TrainingFailure(
                    report.failure.unwrap_or_else(|| "no model produced".to_string()),
                ))
            }
        };

        let last_bar = bars
            .last()
            .ok_or_else(|| PipelineError::TrainingFailure("empty bar series".to_string()))?;
        let current = closes.last().copied().unwrap_or_default();
        let prediction = Prediction::new(
            bars.pair,
            last_bar.bucket_start,
            current,
            predicted,
            report.mae_val,
            report.mae_test,
            bars.len(),
        );
        prediction.log_report();

        self.history.push(prediction.clone());
        self.persist(&prediction).await;

        Ok(prediction)
    }

    async fn persist(&self, prediction: &Prediction) {
        if !self.connected || !self.persistence_ready {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };

        let document = PredictionDocument::from_prediction(
            prediction,
            self.settings.interval_secs,
            FeatureRow::width(self.trainer.config().lookback_window),
        );

        let outcome = tokio::time::timeout(
            self.settings.persist_timeout,
            sink.store_prediction(prediction, &document),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(())) => {
                info!("Prediction saved to {}", prediction.destination());
                return;
            }
            Ok(Err(e)) => PipelineError::PersistenceFailure(e.to_string()),
            Err(_) => PipelineError::PersistenceFailure(format!(
                "timed out after {:?}",
                self.settings.persist_timeout
            )),
        };
        warn!("{}", failure);
    }

    /// Writes the accumulated history as a timestamped JSON file. Returns
    /// `None` when there is nothing to write.
    pub async fn flush_history(&self) -> Result<Option<PathBuf>> {
        if self.history.is_empty() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.settings.history_dir).await?;
        let path = self.settings.history_dir.join(format!(
            "predictions_history_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let body = serde_json::to_string_pretty(&self.history)?;
        tokio::fs::write(&path, body).await?;

        info!("{} predictions saved to {}", self.history.len(), path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::{GbtParams, TrainerConfig};
    use crate::store::MockTradeStore;
    use crate::types::{Signal, TradeEvent};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{DurationRound, Utc};
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    /// One trade per hour over the last `hours` hours, on a gentle wave.
    pub(crate) fn hourly_trades(hours: i64) -> Vec<TradeEvent> {
        let top = Utc::now()
            .duration_trunc(chrono::Duration::hours(1))
            .unwrap();
        (0..hours)
            .map(|i| {
                let t = top - chrono::Duration::hours(hours - i) + chrono::Duration::minutes(30);
                let price = 40_000.0 + 400.0 * (i as f64 / 5.0).sin() + 10.0 * i as f64;
                let price = Decimal::from_f64_retain(price).unwrap().round_dp(2);
                TradeEvent::new(TradingPair::BTCUSDT, t, t, price, Decimal::ONE, i as u64 + 1, false)
            })
            .collect()
    }

    pub(crate) fn store_with(trades: Vec<TradeEvent>) -> MockTradeStore {
        let mut store = MockTradeStore::new();
        store.expect_ping().returning(|| {
            Ok(StoreInfo {
                location: "memory".to_string(),
                log_files: 1,
                total_bytes: 0,
            })
        });
        store
            .expect_fetch_buckets()
            .returning(move |_, _, _, timeframe| crate::bars::bucketize(&trades, timeframe));
        store
    }

    pub(crate) fn fast_trainer() -> ModelTrainer {
        ModelTrainer::new(TrainerConfig {
            gbt: GbtParams {
                n_estimators: 20,
                max_depth: 3,
                ..GbtParams::default()
            },
            ..TrainerConfig::default()
        })
    }

    pub(crate) fn settings(history_dir: PathBuf) -> PredictorSettings {
        PredictorSettings {
            symbol: TradingPair::BTCUSDT,
            timeframe: TimeFrame::H1,
            lookback: chrono::Duration::hours(168),
            max_records: 50_000,
            interval_secs: 60,
            persist_timeout: Duration::from_millis(500),
            history_dir,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        stored: Mutex<Vec<(String, f64)>>,
    }

    #[async_trait]
    impl PredictionSink for RecordingSink {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn store_prediction(&self, prediction: &Prediction, document: &PredictionDocument) -> Result<()> {
            self.stored
                .lock()
                .unwrap()
                .push((prediction.destination(), document.confidence_level));
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl PredictionSink for BrokenSink {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn store_prediction(&self, _: &Prediction, _: &PredictionDocument) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[tokio::test]
    async fn test_predict_produces_consistent_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut predictor = Predictor::new(
            Arc::new(store_with(hourly_trades(100))),
            fast_trainer(),
            settings(dir.path().to_path_buf()),
        )
        .with_sink(sink.clone());

        let info = predictor.connect().await.unwrap();
        assert!(info.persistence);

        let bars = predictor.get_latest_bars().await.unwrap();
        assert_eq!(bars.len(), 100);

        let prediction = predictor.predict(&bars).await.unwrap();
        let last_close = bars.closes_f64()[99];
        assert_eq!(prediction.current_price, last_close);
        assert_eq!(prediction.data_points_used, 100);
        assert_eq!(prediction.data_timestamp, bars.last().unwrap().bucket_start);
        assert!((prediction.price_change - (prediction.predicted_next_price - last_close)).abs() < 1e-9);
        assert_eq!(prediction.trading_signal, Signal::from_change_pct(prediction.price_change_pct));
        assert!(prediction.model_score_val > 0.0);

        assert_eq!(predictor.history().len(), 1);
        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, prediction.destination());
    }

    #[tokio::test]
    async fn test_short_series_is_a_training_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut predictor = Predictor::new(
            Arc::new(store_with(hourly_trades(40))),
            fast_trainer(),
            settings(dir.path().to_path_buf()),
        )
        .with_sink(sink.clone());
        predictor.connect().await.unwrap();
        let bars = predictor.get_latest_bars().await.unwrap();

        let err = predictor.predict(&bars).await.unwrap_err();
        match err {
            PipelineError::TrainingFailure(reason) => assert!(reason.contains("40 price points")),
            other => panic!("expected a training failure, got {:?}", other),
        }
        assert!(predictor.history().is_empty());
        assert!(sink.stored.lock().unwrap().is_empty());

        let empty = BarSeries::new(TradingPair::BTCUSDT, TimeFrame::H1, Vec::new());
        assert!(matches!(
            predictor.predict(&empty).await,
            Err(PipelineError::TrainingFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = Predictor::new(
            Arc::new(store_with(hourly_trades(80))),
            fast_trainer(),
            settings(dir.path().to_path_buf()),
        )
        .with_sink(Arc::new(BrokenSink));
        predictor.connect().await.unwrap();

        let bars = predictor.get_latest_bars().await.unwrap();
        assert!(predictor.predict(&bars).await.is_ok());
        assert_eq!(predictor.history().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_fails_when_store_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockTradeStore::new();
        store
            .expect_ping()
            .returning(|| Err(anyhow!("no such directory")));
        let mut predictor = Predictor::new(Arc::new(store), fast_trainer(), settings(dir.path().to_path_buf()));

        let err = predictor.connect().await.unwrap_err();
        assert!(matches!(err, PipelineError::ConnectionFailure(_)));
        assert!(!predictor.is_connected());
    }

    #[tokio::test]
    async fn test_flush_history_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = Predictor::new(
            Arc::new(store_with(hourly_trades(70))),
            fast_trainer(),
            settings(dir.path().join("history")),
        );
        assert!(predictor.flush_history().await.unwrap().is_none());

        let bars = predictor.get_latest_bars().await.unwrap();
        predictor.predict(&bars).await.unwrap();

        let path = predictor.flush_history().await.unwrap().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("predictions_history_") && name.ends_with(".json"));

        let body = tokio::fs::read_to_string(&path).await.unwrap();
        let saved: Vec<Prediction> = serde_json::from_str(&body).unwrap();
        assert_eq!(saved, predictor.history());
    }
}
