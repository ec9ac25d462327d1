use anyhow::Result;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::types::{TradeRecord, TradingPair};

/// How much of an existing log is scanned on open to recover the last
/// committed trade id.
const TAIL_SCAN_BYTES: u64 = 64 * 1024;

/// Append-only NDJSON trade log for a single pair.
///
/// Owned exclusively by that pair's ingest task. Every record is one line
/// written with a single `write_all` and flushed before the next one.
pub struct TradeLog {
    path: PathBuf,
    file: File,
    last_trade_id: Option<u64>,
    records_written: u64,
    fsync: bool,
}

impl TradeLog {
    pub async fn open(dir: &Path, pair: TradingPair, fsync: bool) -> Result<Self> {
        let path = dir.join(pair.log_file_name());
        let tail = scan_tail(&path).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // Isolate a torn record left by a crash so the next append starts on
        // its own line.
        if tail.torn {
            warn!("Trade log {} ends mid-record, sealing it", path.display());
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        info!(
            "Trade log opened: {} (last trade id: {:?})",
            path.display(),
            tail.last_trade_id
        );

        Ok(Self {
            path,
            file,
            last_trade_id: tail.last_trade_id,
            records_written: 0,
            fsync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_trade_id(&self) -> Option<u64> {
        self.last_trade_id
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// True when a record with this id (or a later one) is already in the log.
    pub fn is_committed(&self, trade_id: u64) -> bool {
        self.last_trade_id.map_or(false, |last| trade_id <= last)
    }

    pub async fn append(&mut self, record: &TradeRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        if self.fsync {
            self.file.sync_data().await?;
        }

        self.last_trade_id = Some(
            self.last_trade_id
                .map_or(record.trade_id, |last| last.max(record.trade_id)),
        );
        self.records_written += 1;
        Ok(())
    }
}

struct TailState {
    last_trade_id: Option<u64>,
    torn: bool,
}

async fn scan_tail(path: &Path) -> Result<TailState> {
    let mut file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(TailState { last_trade_id: None, torn: false });
        }
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(TailState { last_trade_id: None, torn: false });
    }

    file.seek(SeekFrom::Start(len.saturating_sub(TAIL_SCAN_BYTES))).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;

    let torn = buf.last() != Some(&b'\n');
    let text = String::from_utf8_lossy(&buf);
    // Partial lines at either end of the window fail to parse and are ignored.
    let last_trade_id = text
        .lines()
        .filter_map(|line| serde_json::from_str::<TradeRecord>(line).ok())
        .map(|record| record.trade_id)
        .max();

    Ok(TailState { last_trade_id, torn })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeEvent;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn record(id: u64) -> TradeRecord {
        let t = Utc.timestamp_millis_opt(1_700_000_000_000 + id as i64).unwrap();
        let event = TradeEvent::new(TradingPair::ETHUSDT, t, t, dec!(2000.5), dec!(0.1), id, false);
        TradeRecord::from_event(&event, None)
    }

    async fn read_lines(path: &Path) -> Vec<String> {
        tokio::fs::read_to_string(path)
            .await
            .unwrap()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_append_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TradeLog::open(dir.path(), TradingPair::ETHUSDT, false).await.unwrap();

        for id in 1..=3 {
            log.append(&record(id)).await.unwrap();
        }

        let lines = read_lines(log.path()).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(log.records_written(), 3);
        assert_eq!(log.last_trade_id(), Some(3));
        assert!(log.path().ends_with("eth_usdt.ndjson"));
    }

    #[tokio::test]
    async fn test_reopen_recovers_last_committed_id() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = TradeLog::open(dir.path(), TradingPair::ETHUSDT, true).await.unwrap();
            log.append(&record(10)).await.unwrap();
            log.append(&record(11)).await.unwrap();
        }

        let log = TradeLog::open(dir.path(), TradingPair::ETHUSDT, false).await.unwrap();
        assert_eq!(log.last_trade_id(), Some(11));
        assert!(log.is_committed(11));
        assert!(log.is_committed(3));
        assert!(!log.is_committed(12));
    }

    #[tokio::test]
    async fn test_torn_tail_is_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TradingPair::ETHUSDT.log_file_name());
        let first = serde_json::to_string(&record(1)).unwrap();
        tokio::fs::write(&path, format!("{}\n{{\"symbol\":\"ETHU", first))
            .await
            .unwrap();

        let mut log = TradeLog::open(dir.path(), TradingPair::ETHUSDT, false).await.unwrap();
        assert_eq!(log.last_trade_id(), Some(1));
        log.append(&record(2)).await.unwrap();

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 3);
        let parsed: Vec<u64> = lines
            .iter()
            .filter_map(|l| serde_json::from_str::<TradeRecord>(l).ok())
            .map(|r| r.trade_id)
            .collect();
        assert_eq!(parsed, vec![1, 2]);
    }
}
