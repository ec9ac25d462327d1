use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Side, TradingPair};

pub const RECORD_TYPE: &str = "binance-trade";
pub const RECORD_SERVICE: &str = "binance-websocket";

/// A single executed trade as received from the exchange stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub pair: TradingPair,
    pub event_time: DateTime<Utc>,
    pub trade_time: DateTime<Utc>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub trade_id: u64,
    pub is_buyer_maker: bool,
    pub side: Side,
}

impl TradeEvent {
    pub fn new(
        pair: TradingPair,
        event_time: DateTime<Utc>,
        trade_time: DateTime<Utc>,
        price: Decimal,
        quantity: Decimal,
        trade_id: u64,
        is_buyer_maker: bool,
    ) -> Self {
        Self {
            pair,
            event_time,
            trade_time,
            price,
            quantity,
            trade_id,
            is_buyer_maker,
            side: Side::from_buyer_maker(is_buyer_maker),
        }
    }
}

/// Top-of-book snapshot attached to a trade record when depth enrichment is on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthSnapshot {
    pub bids: Vec<[f64; 2]>,
    pub asks: Vec<[f64; 2]>,
    pub spread: Option<f64>,
    pub spread_percentage: Option<f64>,
}

/// One line of the append-only trade log, also the collector push body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    pub trade_id: u64,
    pub buyer_market_maker: bool,
    pub side: Side,
    pub event_time: i64,
    pub trade_time: i64,
    #[serde(rename = "type", default = "default_record_type")]
    pub record_type: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bids: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asks: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_percentage: Option<f64>,
}

fn default_record_type() -> String {
    RECORD_TYPE.to_string()
}

fn default_service() -> String {
    RECORD_SERVICE.to_string()
}

impl TradeRecord {
    pub fn from_event(event: &TradeEvent, depth: Option<&DepthSnapshot>) -> Self {
        Self {
            symbol: event.pair.as_str().to_string(),
            timestamp: event.trade_time,
            price: event.price,
            quantity: event.quantity,
            trade_id: event.trade_id,
            buyer_market_maker: event.is_buyer_maker,
            side: event.side,
            event_time: event.event_time.timestamp_millis(),
            trade_time: event.trade_time.timestamp_millis(),
            record_type: default_record_type(),
            service: default_service(),
            bids: depth.map(|d| d.bids.clone()),
            asks: depth.map(|d| d.asks.clone()),
            spread: depth.and_then(|d| d.spread),
            spread_percentage: depth.and_then(|d| d.spread_percentage),
        }
    }

    pub fn to_event(&self) -> Result<TradeEvent> {
        let pair = TradingPair::from_str(&self.symbol)
            .ok_or_else(|| anyhow!("Unknown symbol in trade record: {}", self.symbol))?;
        let event_time = Utc
            .timestamp_millis_opt(self.event_time)
            .single()
            .ok_or_else(|| anyhow!("Invalid event_time: {}", self.event_time))?;
        let trade_time = Utc
            .timestamp_millis_opt(self.trade_time)
            .single()
            .ok_or_else(|| anyhow!("Invalid trade_time: {}", self.trade_time))?;

        Ok(TradeEvent::new(
            pair,
            event_time,
            trade_time,
            self.price,
            self.quantity,
            self.trade_id,
            self.buyer_market_maker,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_event() -> TradeEvent {
        let t = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        TradeEvent::new(TradingPair::BTCUSDT, t, t, dec!(43250.5), dec!(0.012), 77, true)
    }

    #[test]
    fn test_record_wire_format() {
        let record = TradeRecord::from_event(&sample_event(), None);
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();

        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["side"], "sell");
        assert_eq!(json["type"], "binance-trade");
        assert_eq!(json["trade_time"], 1_700_000_000_123i64);
        assert!(json["price"].is_number());
        assert!(json.get("bids").is_none());
    }

    #[test]
    fn test_record_back_to_event() {
        let event = sample_event();
        let line = serde_json::to_string(&TradeRecord::from_event(&event, None)).unwrap();
        let parsed: TradeRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.to_event().unwrap(), event);
    }

    #[test]
    fn test_record_with_depth() {
        let depth = DepthSnapshot {
            bids: vec![[43250.0, 1.5]],
            asks: vec![[43251.0, 0.5]],
            spread: Some(1.0),
            spread_percentage: Some(0.002312),
        };
        let record = TradeRecord::from_event(&sample_event(), Some(&depth));
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["spread"], 1.0);
        assert_eq!(json["asks"][0][0], 43251.0);
    }
}
