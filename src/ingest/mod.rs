pub mod collector;
pub mod log;

pub use collector::*;
pub use log::*;

use anyhow::Result;
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::exchange::{parse_trade_message, BinanceClient, StreamConnector};
use crate::types::{DepthSnapshot, TradeEvent, TradeRecord, TradingPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub connection_attempts: u64,
    pub sessions: u64,
    pub records_written: u64,
    pub duplicates_skipped: u64,
    pub parse_failures: u64,
    pub collector_failures: u64,
    pub depth_failures: u64,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub data_dir: PathBuf,
    pub fsync: bool,
    pub reconnect_delay: Duration,
    pub push_timeout: Duration,
    pub depth_limit: u32,
}

/// Streams one pair's trades into its log, reconnecting until shut down.
pub struct SymbolIngestor {
    pair: TradingPair,
    log: TradeLog,
    connector: Arc<dyn StreamConnector>,
    collector: Arc<dyn Collector>,
    depth: Option<BinanceClient>,
    settings: IngestSettings,
    state: ConnectionState,
    stats: IngestStats,
}

impl SymbolIngestor {
    pub fn new(
        pair: TradingPair,
        log: TradeLog,
        connector: Arc<dyn StreamConnector>,
        collector: Arc<dyn Collector>,
        depth: Option<BinanceClient>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            pair,
            log,
            connector,
            collector,
            depth,
            settings,
            state: ConnectionState::Disconnected,
            stats: IngestStats::default(),
        }
    }

    pub fn pair(&self) -> TradingPair {
        self.pair
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("{} connection: {:?} -> {:?}", self.pair, self.state, next);
            self.state = next;
        }
    }

    /// One connect-and-consume session. Returns when the stream ends or fails.
    pub async fn run_session(&mut self) -> Result<()> {
        let result = self.stream_session().await;
        self.transition(ConnectionState::Disconnected);
        result
    }

    async fn stream_session(&mut self) -> Result<()> {
        self.transition(ConnectionState::Connecting);
        self.stats.connection_attempts += 1;

        let mut stream = self.connector.connect(self.pair).await?;
        self.transition(ConnectionState::Streaming);
        self.stats.sessions += 1;

        while let Some(message) = stream.next().await {
            let text = message?;
            self.handle_message(&text).await?;
        }

        Ok(())
    }

    /// Parses, deduplicates, commits and forwards a single stream message.
    ///
    /// Only a failed log write is returned as an error; everything else is
    /// counted and skipped.
    pub async fn handle_message(&mut self, text: &str) -> Result<Option<TradeEvent>> {
        let event = match parse_trade_message(text) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.parse_failures += 1;
                warn!("[PARSE] {} - dropping message: {}", self.pair, e);
                return Ok(None);
            }
        };

        if event.pair != self.pair {
            warn!("{} stream delivered a {} trade, ignoring", self.pair, event.pair);
            return Ok(None);
        }

        if self.log.is_committed(event.trade_id) {
            self.stats.duplicates_skipped += 1;
            debug!("{} trade {} already committed", self.pair, event.trade_id);
            return Ok(None);
        }

        let depth = self.fetch_depth().await;
        let record = TradeRecord::from_event(&event, depth.as_ref());
        self.log.append(&record).await?;
        self.stats.records_written += 1;

        debug!(
            "[{}] {} - Price: {} - Qty: {} - {}",
            event.trade_time.format("%H:%M:%S"),
            self.pair,
            event.price,
            event.quantity,
            event.side
        );

        self.forward(&record).await;
        Ok(Some(event))
    }

    /// `None` when enrichment is off. A failed fetch still enriches the
    /// record, with an empty snapshot.
    async fn fetch_depth(&mut self) -> Option<DepthSnapshot> {
        let client = self.depth.as_ref()?;
        match client.get_depth_snapshot(self.pair, self.settings.depth_limit).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.stats.depth_failures += 1;
                warn!("Depth snapshot failed for {}: {}", self.pair, e);
                Some(DepthSnapshot::default())
            }
        }
    }

    async fn forward(&mut self, record: &TradeRecord) {
        let push = self.collector.push(record);
        match tokio::time::timeout(self.settings.push_timeout, push).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.collector_failures += 1;
                warn!("Collector push failed for {}: {}", self.pair, e);
            }
            Err(_) => {
                self.stats.collector_failures += 1;
                warn!(
                    "Collector push timed out for {} after {:?}",
                    self.pair, self.settings.push_timeout
                );
            }
        }
    }

    /// Runs sessions back to back with a fixed delay until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> IngestStats {
        info!("Ingestor started for {}", self.pair);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                result = self.run_session() => Some(result),
                _ = shutdown.changed() => None,
            };

            match outcome {
                Some(Ok(())) => warn!("[CLOSED] {} - stream ended", self.pair),
                Some(Err(e)) => error!("[EXCEPTION] {} - {}", self.pair, e),
                None => break,
            }

            info!(
                "[RETRY] {} -> reconnecting in {:?}",
                self.pair, self.settings.reconnect_delay
            );

            let stop = tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_delay) => false,
                _ = shutdown.changed() => true,
            };
            if stop {
                break;
            }
        }

        self.transition(ConnectionState::Disconnected);
        info!(
            "Ingestor stopped for {}: {} records, {} duplicates skipped, {} sessions",
            self.pair,
            self.stats.records_written,
            self.stats.duplicates_skipped,
            self.stats.sessions
        );
        self.stats
    }
}

/// Fans out one independent ingest task per pair.
pub struct Ingestor {
    settings: IngestSettings,
    connector: Arc<dyn StreamConnector>,
    collector: Arc<dyn Collector>,
    depth: Option<BinanceClient>,
}

impl Ingestor {
    pub fn new(
        settings: IngestSettings,
        connector: Arc<dyn StreamConnector>,
        collector: Arc<dyn Collector>,
    ) -> Self {
        Self {
            settings,
            connector,
            collector,
            depth: None,
        }
    }

    pub fn with_depth(mut self, client: BinanceClient) -> Self {
        self.depth = Some(client);
        self
    }

    /// Opens every pair's log up front, then spawns the tasks. A log that
    /// cannot be opened aborts the whole start.
    pub async fn spawn(
        &self,
        pairs: &[TradingPair],
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<(TradingPair, JoinHandle<IngestStats>)>> {
        tokio::fs::create_dir_all(&self.settings.data_dir).await?;

        let mut ingestors = Vec::with_capacity(pairs.len());
        for &pair in pairs {
            let log = TradeLog::open(&self.settings.data_dir, pair, self.settings.fsync).await?;
            ingestors.push(SymbolIngestor::new(
                pair,
                log,
                self.connector.clone(),
                self.collector.clone(),
                self.depth.clone(),
                self.settings.clone(),
            ));
        }

        Ok(ingestors
            .into_iter()
            .map(|ingestor| {
                let pair = ingestor.pair();
                (pair, tokio::spawn(ingestor.run(shutdown.clone())))
            })
            .collect())
    }
}
