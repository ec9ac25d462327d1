use anyhow::Result;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::types::{DepthSnapshot, TradingPair};

pub const BINANCE_API: &str = "https://api.binance.com";

/// Public REST client used for order book snapshots.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn public_only(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn get_order_book(&self, pair: TradingPair, limit: u32) -> Result<OrderBook> {
        let url = format!("{}/api/v3/depth?symbol={}&limit={}", self.base_url, pair, limit);

        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let resp: DepthResponse = resp.json().await?;

        debug!("Depth for {}: update {}", pair, resp.last_update_id);

        Ok(OrderBook {
            pair,
            bids: parse_levels(&resp.bids)?,
            asks: parse_levels(&resp.asks)?,
            last_update_id: resp.last_update_id,
        })
    }

    /// Top-of-book snapshot for trade record enrichment.
    pub async fn get_depth_snapshot(&self, pair: TradingPair, limit: u32) -> Result<DepthSnapshot> {
        let book = self.get_order_book(pair, limit).await?;
        Ok(book.to_snapshot())
    }
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub pair: TradingPair,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub last_update_id: u64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<Decimal> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some(ask - bid)
    }

    /// Spread as a percentage of the best bid
    pub fn spread_percentage(&self) -> Option<Decimal> {
        let (bid, _) = self.best_bid()?;
        let spread = self.spread()?;
        if bid.is_zero() || spread.is_zero() {
            return None;
        }
        Some((spread / bid * Decimal::from(100)).round_dp(6))
    }

    pub fn to_snapshot(&self) -> DepthSnapshot {
        let levels = |side: &[(Decimal, Decimal)]| -> Vec<[f64; 2]> {
            side.iter()
                .filter_map(|(p, q)| Some([p.to_f64()?, q.to_f64()?]))
                .collect()
        };

        DepthSnapshot {
            bids: levels(self.bids.as_slice()),
            asks: levels(self.asks.as_slice()),
            spread: self.spread().and_then(|s| s.round_dp(8).to_f64()),
            spread_percentage: self.spread_percentage().and_then(|s| s.to_f64()),
        }
    }
}

fn parse_levels(raw: &[(String, String)]) -> Result<Vec<(Decimal, Decimal)>> {
    raw.iter()
        .map(|(price, qty)| Ok((Decimal::from_str(price)?, Decimal::from_str(qty)?)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_book_snapshot() {
        let book = OrderBook {
            pair: TradingPair::BTCUSDT,
            bids: vec![(dec!(100), dec!(2)), (dec!(99.5), dec!(1))],
            asks: vec![(dec!(100.5), dec!(3))],
            last_update_id: 1,
        };

        assert_eq!(book.spread(), Some(dec!(0.5)));
        assert_eq!(book.spread_percentage(), Some(dec!(0.5)));

        let snapshot = book.to_snapshot();
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.asks[0], [100.5, 3.0]);
        assert_eq!(snapshot.spread, Some(0.5));
    }

    #[test]
    fn test_empty_book_has_no_spread() {
        let book = OrderBook {
            pair: TradingPair::ETHUSDT,
            bids: vec![],
            asks: vec![(dec!(10), dec!(1))],
            last_update_id: 2,
        };
        let snapshot = book.to_snapshot();
        assert!(snapshot.spread.is_none());
        assert!(snapshot.spread_percentage.is_none());
    }

    #[test]
    fn test_depth_response_parsing() {
        let json = r#"{"lastUpdateId":1027024,"bids":[["4.00000000","431.00000000"]],"asks":[["4.00000200","12.00000000"]]}"#;
        let resp: DepthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.last_update_id, 1027024);
        assert_eq!(parse_levels(&resp.bids).unwrap(), vec![(dec!(4), dec!(431))]);
        assert!(parse_levels(&[("x".to_string(), "1".to_string())]).is_err());
    }
}
