use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::BoxStream;
use futures_util::{future, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

use crate::types::{TradeEvent, TradingPair};

pub const BINANCE_WS: &str = "wss://stream.binance.com:9443/ws";

/// Text frames of one live connection. The stream ends when the server closes
/// the socket; a transport error is yielded as `Err` and ends the session.
pub type MessageStream = BoxStream<'static, Result<String>>;

/// Opens one trade stream connection per call.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, pair: TradingPair) -> Result<MessageStream>;
}

pub struct BinanceWebSocket {
    base_url: String,
}

impl BinanceWebSocket {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, pair: TradingPair) -> String {
        format!("{}/{}", self.base_url, pair.trade_stream())
    }
}

impl Default for BinanceWebSocket {
    fn default() -> Self {
        Self::new(BINANCE_WS)
    }
}

#[async_trait]
impl StreamConnector for BinanceWebSocket {
    async fn connect(&self, pair: TradingPair) -> Result<MessageStream> {
        let url = self.stream_url(pair);
        info!("[CONNECT] {} -> {}", pair, url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!("WebSocket connected: {}", pair);

        let stream = ws_stream
            .take_while(move |msg| {
                let open = !matches!(msg, Ok(Message::Close(_)));
                if !open {
                    info!("[CLOSED] {} - WebSocket closed by server", pair);
                }
                future::ready(open)
            })
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Ping(_)) => {
                        debug!("Received ping");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(anyhow!(e))),
                })
            })
            .boxed();

        Ok(stream)
    }
}

/// Parses a raw (`<symbol>@trade`) or combined-stream trade payload.
///
/// Returns `Ok(None)` for well-formed messages that are not trades.
pub fn parse_trade_message(text: &str) -> Result<Option<TradeEvent>> {
    if let Ok(combined) = serde_json::from_str::<CombinedStreamMessage>(text) {
        if !combined.stream.contains("@trade") {
            return Ok(None);
        }
        let trade: WsTradeMessage = serde_json::from_value(combined.data)?;
        return parse_trade(&trade).map(Some);
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    match value.get("e").and_then(|e| e.as_str()) {
        Some("trade") => {
            let trade: WsTradeMessage = serde_json::from_value(value)?;
            parse_trade(&trade).map(Some)
        }
        _ => {
            debug!("Unknown message type: {}", text);
            Ok(None)
        }
    }
}

fn parse_trade(msg: &WsTradeMessage) -> Result<TradeEvent> {
    let pair = TradingPair::from_str(&msg.symbol)
        .ok_or_else(|| anyhow!("Unknown symbol: {}", msg.symbol))?;
    let event_time = Utc
        .timestamp_millis_opt(msg.event_time)
        .single()
        .ok_or_else(|| anyhow!("Invalid event time: {}", msg.event_time))?;
    let trade_time = Utc
        .timestamp_millis_opt(msg.trade_time)
        .single()
        .ok_or_else(|| anyhow!("Invalid trade time: {}", msg.trade_time))?;

    Ok(TradeEvent::new(
        pair,
        event_time,
        trade_time,
        Decimal::from_str(&msg.price)?,
        Decimal::from_str(&msg.quantity)?,
        msg.trade_id,
        msg.is_buyer_maker,
    ))
}

// Combined-stream payloads
#[derive(Debug, Deserialize)]
struct CombinedStreamMessage {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WsTradeMessage {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    const RAW_TRADE: &str = r#"{"e":"trade","E":1700000000500,"s":"BTCUSDT","t":12345,"p":"43250.10","q":"0.00150","T":1700000000499,"m":true,"M":true}"#;

    #[test]
    fn test_parse_raw_trade() {
        let event = parse_trade_message(RAW_TRADE).unwrap().unwrap();
        assert_eq!(event.pair, TradingPair::BTCUSDT);
        assert_eq!(event.trade_id, 12345);
        assert_eq!(event.price, dec!(43250.10));
        assert_eq!(event.quantity, dec!(0.0015));
        assert_eq!(event.side, Side::Sell);
        assert_eq!(event.trade_time.timestamp_millis(), 1_700_000_000_499);
        assert_eq!(event.event_time.timestamp_millis(), 1_700_000_000_500);
    }

    #[test]
    fn test_parse_combined_trade() {
        let text = format!(r#"{{"stream":"btcusdt@trade","data":{}}}"#, RAW_TRADE);
        let event = parse_trade_message(&text).unwrap().unwrap();
        assert_eq!(event.trade_id, 12345);
    }

    #[test]
    fn test_non_trade_and_malformed() {
        assert!(parse_trade_message(r#"{"result":null,"id":1}"#).unwrap().is_none());
        assert!(parse_trade_message("not json").is_err());
        assert!(parse_trade_message(r#"{"e":"trade","s":"BTCUSDT"}"#).is_err());
    }

    #[test]
    fn test_stream_url() {
        let ws = BinanceWebSocket::new("wss://example.test/ws/");
        assert_eq!(ws.stream_url(TradingPair::ETHUSDT), "wss://example.test/ws/ethusdt@trade");
    }
}
