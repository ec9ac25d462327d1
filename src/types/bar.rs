use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{TimeFrame, TradingPair};

/// OHLCV summary of the trades inside one fixed time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

impl PriceBar {
    /// `high >= max(open, close)` and `low <= min(open, close)`
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close) && self.low <= self.open.min(self.close)
    }
}

/// Ascending, sparse sequence of bars for one pair at one granularity.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub pair: TradingPair,
    pub timeframe: TimeFrame,
    pub bars: Vec<PriceBar>,
}

impl BarSeries {
    pub fn new(pair: TradingPair, timeframe: TimeFrame, bars: Vec<PriceBar>) -> Self {
        Self { pair, timeframe, bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Close prices as f64 for the model; non-representable values become NaN
    /// and are rejected by the trainer.
    pub fn closes_f64(&self) -> Vec<f64> {
        self.bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(f64::NAN))
            .collect()
    }
}
