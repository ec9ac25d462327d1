use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::predictor::Predictor;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{BarSeries, Prediction};

pub const DEFAULT_MIN_BARS: usize = 20;

/// Gate applied before a prediction: too few bars means the cycle is skipped.
pub fn require_bars(bars: &BarSeries, min_bars: usize) -> PipelineResult<()> {
    if bars.len() < min_bars {
        return Err(PipelineError::InsufficientData {
            available: bars.len(),
            required: min_bars,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Predicted(Prediction),
    Skipped { available: usize, required: usize },
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub cycles: u32,
    pub predictions: u32,
    pub skipped: u32,
    pub failed: u32,
    pub cancelled: bool,
    pub history_file: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Drives prediction cycles at a fixed cadence until the cycle budget is
/// spent or shutdown is signalled.
pub struct Scheduler<'a> {
    predictor: &'a mut Predictor,
    min_bars: usize,
    shutdown: watch::Receiver<bool>,
}

impl<'a> Scheduler<'a> {
    pub fn new(predictor: &'a mut Predictor, min_bars: usize, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            predictor,
            min_bars,
            shutdown,
        }
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let bars = match self.predictor.get_latest_bars().await {
            Ok(bars) => bars,
            Err(e) => return CycleOutcome::Failed(e.to_string()),
        };

        if let Err(PipelineError::InsufficientData { available, required }) =
            require_bars(&bars, self.min_bars)
        {
            return CycleOutcome::Skipped { available, required };
        }

        match self.predictor.predict(&bars).await {
            Ok(prediction) => CycleOutcome::Predicted(prediction),
            Err(e) => CycleOutcome::Failed(e.to_string()),
        }
    }

    /// Runs up to `max_cycles` cycles (unbounded when `None`). Skipped and
    /// failed cycles count toward the budget. History is flushed on exit.
    pub async fn run_loop(&mut self, interval: Duration, max_cycles: Option<u32>) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary::default();

        info!(
            "Starting prediction loop: every {:?}, {}",
            interval,
            max_cycles.map_or("until stopped".to_string(), |n| format!("{} cycles", n))
        );

        loop {
            if max_cycles.map_or(false, |max| summary.cycles >= max) {
                break;
            }
            if *self.shutdown.borrow() {
                summary.cancelled = true;
                break;
            }

            let cycle_started = Instant::now();
            summary.cycles += 1;
            info!("--- Prediction cycle {} ---", summary.cycles);

            match self.run_cycle().await {
                CycleOutcome::Predicted(prediction) => {
                    summary.predictions += 1;
                    info!(
                        "Cycle {}: {} {:+.2}% -> {}",
                        summary.cycles,
                        prediction.symbol,
                        prediction.price_change_pct,
                        prediction.trading_signal
                    );
                }
                CycleOutcome::Skipped { available, required } => {
                    summary.skipped += 1;
                    warn!(
                        "[SKIP] Cycle {}: not enough data ({} available, {} required)",
                        summary.cycles, available, required
                    );
                }
                CycleOutcome::Failed(reason) => {
                    summary.failed += 1;
                    error!("Cycle {} failed: {}", summary.cycles, reason);
                }
            }

            if max_cycles.map_or(false, |max| summary.cycles >= max) {
                break;
            }

            let wait = interval.saturating_sub(cycle_started.elapsed());
            info!("Next prediction in {:.1}s", wait.as_secs_f64());
            if sleep_or_cancel(&mut self.shutdown, wait).await {
                summary.cancelled = true;
                break;
            }
        }

        summary.history_file = match self.predictor.flush_history().await {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to save prediction history: {}", e);
                None
            }
        };
        summary.elapsed = started.elapsed();

        info!(
            "Prediction loop finished: {} cycles, {} predictions, {} skipped, {} failed{}",
            summary.cycles,
            summary.predictions,
            summary.skipped,
            summary.failed,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        summary
    }
}

/// Sleeps for `wait`; returns true if shutdown was signalled first.
async fn sleep_or_cancel(shutdown: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender gone: nobody can cancel any more.
                    (&mut sleep).await;
                    return false;
                }
                if *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::predictor::tests::{fast_trainer, hourly_trades, settings, store_with};
    use crate::store::MockTradeStore;
    use crate::types::{PriceBar, TimeFrame, TradingPair};
    use anyhow::anyhow;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn predictor(trades: Vec<crate::types::TradeEvent>, dir: &std::path::Path) -> Predictor {
        Predictor::new(Arc::new(store_with(trades)), fast_trainer(), settings(dir.to_path_buf()))
    }

    #[tokio::test]
    async fn test_bounded_loop_runs_exact_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = predictor(hourly_trades(90), dir.path());
        let (_tx, rx) = watch::channel(false);

        let summary = Scheduler::new(&mut predictor, DEFAULT_MIN_BARS, rx)
            .run_loop(Duration::from_millis(5), Some(3))
            .await;

        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.predictions, 3);
        assert!(!summary.cancelled);
        assert!(summary.history_file.as_ref().unwrap().exists());
        assert_eq!(predictor.history().len(), 3);
    }

    #[tokio::test]
    async fn test_sparse_data_is_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = predictor(hourly_trades(10), dir.path());
        let (_tx, rx) = watch::channel(false);

        let summary = Scheduler::new(&mut predictor, DEFAULT_MIN_BARS, rx)
            .run_loop(Duration::from_millis(1), Some(2))
            .await;

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 0);
        assert!(summary.history_file.is_none());
    }

    #[tokio::test]
    async fn test_too_few_points_for_training_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        // Enough bars for the scheduler, too few for the trainer
        let mut predictor = predictor(hourly_trades(30), dir.path());
        let (_tx, rx) = watch::channel(false);

        let summary = Scheduler::new(&mut predictor, DEFAULT_MIN_BARS, rx)
            .run_loop(Duration::from_millis(1), Some(1))
            .await;

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.predictions, 0);
    }

    #[test]
    fn test_require_bars_gate() {
        let bar = PriceBar {
            bucket_start: chrono::Utc::now(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            volume: Decimal::ONE,
            trade_count: 1,
        };
        let series = |n: usize| BarSeries::new(TradingPair::BTCUSDT, TimeFrame::H1, vec![bar.clone(); n]);

        assert!(require_bars(&series(20), DEFAULT_MIN_BARS).is_ok());
        assert!(matches!(
            require_bars(&series(19), DEFAULT_MIN_BARS),
            Err(PipelineError::InsufficientData { available: 19, required: 20 })
        ));
    }

    #[tokio::test]
    async fn test_store_errors_count_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockTradeStore::new();
        store
            .expect_fetch_buckets()
            .returning(|_, _, _, _| Err(anyhow!("read error")));
        let mut predictor = Predictor::new(Arc::new(store), fast_trainer(), settings(dir.path().to_path_buf()));
        let (_tx, rx) = watch::channel(false);

        let summary = Scheduler::new(&mut predictor, DEFAULT_MIN_BARS, rx)
            .run_loop(Duration::from_millis(1), Some(2))
            .await;

        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn test_no_sleep_after_final_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = predictor(hourly_trades(10), dir.path());
        let (_tx, rx) = watch::channel(false);

        let summary = Scheduler::new(&mut predictor, DEFAULT_MIN_BARS, rx)
            .run_loop(Duration::from_secs(30), Some(1))
            .await;

        assert_eq!(summary.cycles, 1);
        assert!(summary.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = predictor(hourly_trades(10), dir.path());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = Scheduler::new(&mut predictor, DEFAULT_MIN_BARS, rx)
            .run_loop(Duration::from_secs(1), None)
            .await;

        assert_eq!(summary.cycles, 0);
        assert!(summary.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = predictor(hourly_trades(10), dir.path());
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        let summary = Scheduler::new(&mut predictor, DEFAULT_MIN_BARS, rx)
            .run_loop(Duration::from_secs(60), None)
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.cycles, 1);
        assert!(summary.elapsed < Duration::from_secs(30));
    }
}
