use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

use crate::store::TradeStore;
use crate::types::{BarSeries, PriceBar, TimeFrame, TradeEvent, TradingPair};

/// Per-bucket aggregate as produced by the bar query.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStats {
    pub bucket_start: DateTime<Utc>,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub first_price: Decimal,
    pub last_price: Decimal,
    pub quantity: Decimal,
    pub trade_ids: HashSet<u64>,
    first_key: (DateTime<Utc>, u64),
    last_key: (DateTime<Utc>, u64),
}

impl BucketStats {
    fn open(bucket_start: DateTime<Utc>, trade: &TradeEvent) -> Self {
        let key = (trade.trade_time, trade.trade_id);
        Self {
            bucket_start,
            min_price: trade.price,
            max_price: trade.price,
            first_price: trade.price,
            last_price: trade.price,
            quantity: trade.quantity,
            trade_ids: HashSet::from([trade.trade_id]),
            first_key: key,
            last_key: key,
        }
    }

    /// First and last are decided on (trade_time, trade_id), so trades may
    /// arrive in any order.
    fn absorb(&mut self, trade: &TradeEvent) {
        let key = (trade.trade_time, trade.trade_id);
        if key < self.first_key {
            self.first_key = key;
            self.first_price = trade.price;
        }
        if key > self.last_key {
            self.last_key = key;
            self.last_price = trade.price;
        }
        self.min_price = self.min_price.min(trade.price);
        self.max_price = self.max_price.max(trade.price);
        self.quantity += trade.quantity;
        self.trade_ids.insert(trade.trade_id);
    }

    pub fn to_bar(&self) -> PriceBar {
        PriceBar {
            bucket_start: self.bucket_start,
            open: self.first_price,
            high: self.max_price,
            low: self.min_price,
            close: self.last_price,
            volume: self.quantity,
            trade_count: self.trade_ids.len() as u64,
        }
    }
}

/// Folds trades into buckets one at a time, without holding the trades.
#[derive(Debug)]
pub struct BucketAccumulator {
    timeframe: TimeFrame,
    buckets: BTreeMap<DateTime<Utc>, BucketStats>,
    trades: usize,
}

impl BucketAccumulator {
    pub fn new(timeframe: TimeFrame) -> Self {
        Self {
            timeframe,
            buckets: BTreeMap::new(),
            trades: 0,
        }
    }

    pub fn push(&mut self, trade: &TradeEvent) -> Result<()> {
        let start = bucket_start(trade.trade_time, self.timeframe)?;
        self.buckets
            .entry(start)
            .and_modify(|b| b.absorb(trade))
            .or_insert_with(|| BucketStats::open(start, trade));
        self.trades += 1;
        Ok(())
    }

    /// Trades absorbed so far.
    pub fn trades(&self) -> usize {
        self.trades
    }

    /// Sparse buckets, ascending by start.
    pub fn finish(self) -> Vec<BucketStats> {
        self.buckets.into_values().collect()
    }
}

/// UTC-aligned start of the bucket containing `t`.
pub fn bucket_start(t: DateTime<Utc>, timeframe: TimeFrame) -> Result<DateTime<Utc>> {
    let granularity = timeframe.to_milliseconds();
    let ms = t.timestamp_millis().div_euclid(granularity) * granularity;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("Bucket start out of range for {}", t))
}

/// Groups trades into sparse ascending buckets. Input order does not matter.
pub fn bucketize(trades: &[TradeEvent], timeframe: TimeFrame) -> Result<Vec<BucketStats>> {
    let mut acc = BucketAccumulator::new(timeframe);
    for trade in trades {
        acc.push(trade)?;
    }
    Ok(acc.finish())
}

pub fn aggregate(trades: &[TradeEvent], timeframe: TimeFrame) -> Result<Vec<PriceBar>> {
    Ok(bucketize(trades, timeframe)?.iter().map(BucketStats::to_bar).collect())
}

/// Builds bar series from the trade store.
pub struct BarAggregator {
    store: Arc<dyn TradeStore>,
    timeframe: TimeFrame,
}

impl BarAggregator {
    pub fn new(store: Arc<dyn TradeStore>, timeframe: TimeFrame) -> Self {
        Self { store, timeframe }
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    /// Bars covering `[now - lookback, now]`, at most `limit` of them (the
    /// most recent). An empty series is a valid result meaning there is no
    /// data yet.
    pub async fn get_bars(
        &self,
        pair: TradingPair,
        lookback: Duration,
        limit: usize,
    ) -> Result<BarSeries> {
        self.get_bars_until(pair, Utc::now(), lookback, limit).await
    }

    pub async fn get_bars_until(
        &self,
        pair: TradingPair,
        until: DateTime<Utc>,
        lookback: Duration,
        limit: usize,
    ) -> Result<BarSeries> {
        let since = until - lookback;
        let buckets = self
            .store
            .fetch_buckets(pair, since, until, self.timeframe)
            .await?;

        let skip = buckets.len().saturating_sub(limit);
        let bars: Vec<PriceBar> = buckets[skip..].iter().map(BucketStats::to_bar).collect();
        info!(
            "Retrieved {} {} bars for {} since {}",
            bars.len(),
            self.timeframe,
            pair,
            since
        );

        Ok(BarSeries::new(pair, self.timeframe, bars))
    }
}
