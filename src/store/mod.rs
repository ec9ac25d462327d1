use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::bars::{BucketAccumulator, BucketStats};
use crate::types::{TimeFrame, TradeRecord, TradingPair};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub location: String,
    pub log_files: usize,
    pub total_bytes: u64,
}

/// Read side of the trade history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Verifies the store is reachable.
    async fn ping(&self) -> Result<StoreInfo>;

    /// Every trade for `pair` with `since <= trade_time <= until`, bucketed
    /// at `timeframe`. Buckets come back sparse and ascending.
    async fn fetch_buckets(
        &self,
        pair: TradingPair,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        timeframe: TimeFrame,
    ) -> Result<Vec<BucketStats>>;
}

/// Reads the per-pair NDJSON logs written by the ingestor.
pub struct NdjsonTradeStore {
    data_dir: PathBuf,
}

impl NdjsonTradeStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn log_path(&self, pair: TradingPair) -> PathBuf {
        self.data_dir.join(pair.log_file_name())
    }
}

#[async_trait]
impl TradeStore for NdjsonTradeStore {
    async fn ping(&self) -> Result<StoreInfo> {
        let meta = match tokio::fs::metadata(&self.data_dir).await {
            Ok(meta) => meta,
            Err(e) => bail!("Trade data directory {} unavailable: {}", self.data_dir.display(), e),
        };
        if !meta.is_dir() {
            bail!("{} is not a directory", self.data_dir.display());
        }

        let mut log_files = 0;
        let mut total_bytes = 0;
        for pair in TradingPair::ALL {
            if let Ok(meta) = tokio::fs::metadata(self.log_path(pair)).await {
                log_files += 1;
                total_bytes += meta.len();
            }
        }

        Ok(StoreInfo {
            location: self.data_dir.display().to_string(),
            log_files,
            total_bytes,
        })
    }

    async fn fetch_buckets(
        &self,
        pair: TradingPair,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        timeframe: TimeFrame,
    ) -> Result<Vec<BucketStats>> {
        let path = self.log_path(pair);
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No trade log yet for {} at {}", pair, path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut buckets = BucketAccumulator::new(timeframe);
        let mut skipped = 0usize;
        let mut lines = BufReader::new(file).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event = match serde_json::from_str::<TradeRecord>(&line)
                .map_err(anyhow::Error::from)
                .and_then(|record| record.to_event())
            {
                Ok(event) => event,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };

            if event.pair != pair || event.trade_time < since || event.trade_time > until {
                continue;
            }
            buckets.push(&event)?;
        }

        if skipped > 0 {
            warn!("Skipped {} unreadable lines in {}", skipped, path.display());
        }
        debug!("Aggregated {} {} trades from {}", buckets.trades(), pair, path.display());

        Ok(buckets.finish())
    }
}
