use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Signal, TradingPair};

pub const PREDICTION_TYPE: &str = "realtime_gbt";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result of one full retrain-and-predict cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub symbol: TradingPair,
    pub timestamp: DateTime<Utc>,
    pub data_timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub predicted_next_price: f64,
    pub price_change: f64,
    pub price_change_pct: f64,
    pub model_score_val: f64,
    pub model_score_test: f64,
    pub data_points_used: usize,
    pub trading_signal: Signal,
    pub signal_strength: f64,
}

impl Prediction {
    /// Builds a prediction from the current and predicted price, deriving the
    /// deltas and the signal.
    pub fn new(
        symbol: TradingPair,
        data_timestamp: DateTime<Utc>,
        current_price: f64,
        predicted_next_price: f64,
        model_score_val: f64,
        model_score_test: f64,
        data_points_used: usize,
    ) -> Self {
        let price_change = predicted_next_price - current_price;
        let price_change_pct = if current_price != 0.0 {
            price_change / current_price * 100.0
        } else {
            0.0
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol,
            timestamp: Utc::now(),
            data_timestamp,
            current_price,
            predicted_next_price,
            price_change,
            price_change_pct,
            model_score_val,
            model_score_test,
            data_points_used,
            trading_signal: Signal::from_change_pct(price_change_pct),
            signal_strength: Signal::strength_for(price_change_pct),
        }
    }

    /// Monthly destination for persisted documents, e.g. `binance-predictions-2024.05`
    pub fn destination(&self) -> String {
        format!("binance-predictions-{}", self.timestamp.format("%Y.%m"))
    }

    pub fn log_report(&self) {
        info!("============================================================");
        info!("NEW PREDICTION {}", self.symbol);
        info!("Timestamp:       {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"));
        info!("Data as of:      {}", self.data_timestamp);
        info!("Current price:   ${:.2}", self.current_price);
        info!("Predicted price: ${:.2}", self.predicted_next_price);
        info!("Change:          {:+.2}$ ({:+.2}%)", self.price_change, self.price_change_pct);
        info!("MAE validation:  {:.6}", self.model_score_val);
        info!("MAE test:        {:.6}", self.model_score_test);
        info!("Points used:     {}", self.data_points_used);
        info!("Signal:          {} (strength {:.1})", self.trading_signal, self.signal_strength);
    }
}

/// Persisted form of a prediction, one per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionDocument {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub data_timestamp: DateTime<Utc>,
    pub symbol: String,
    pub current_price: f64,
    pub predicted_next_price: f64,
    pub price_change: f64,
    pub price_change_pct: f64,
    pub model_score_val: f64,
    pub model_score_test: f64,
    pub data_points_used: usize,
    pub prediction_type: String,
    pub service_version: String,
    pub trading_signal: Signal,
    pub signal_strength: f64,
    pub prediction_interval_seconds: u64,
    pub model_features: usize,
    pub confidence_level: f64,
}

impl PredictionDocument {
    pub fn from_prediction(
        prediction: &Prediction,
        interval_seconds: u64,
        model_features: usize,
    ) -> Self {
        Self {
            timestamp: prediction.timestamp,
            data_timestamp: prediction.data_timestamp,
            symbol: prediction.symbol.as_str().to_string(),
            current_price: prediction.current_price,
            predicted_next_price: prediction.predicted_next_price,
            price_change: prediction.price_change,
            price_change_pct: prediction.price_change_pct,
            model_score_val: prediction.model_score_val,
            model_score_test: prediction.model_score_test,
            data_points_used: prediction.data_points_used,
            prediction_type: PREDICTION_TYPE.to_string(),
            service_version: SERVICE_VERSION.to_string(),
            trading_signal: prediction.trading_signal,
            signal_strength: prediction.signal_strength,
            prediction_interval_seconds: interval_seconds,
            model_features,
            confidence_level: (1.0 - prediction.model_score_val).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_derives_signal() {
        let p = Prediction::new(TradingPair::BTCUSDT, Utc::now(), 100.0, 103.0, 0.02, 0.03, 120);
        assert!((p.price_change - 3.0).abs() < 1e-9);
        assert!((p.price_change_pct - 3.0).abs() < 1e-9);
        assert_eq!(p.trading_signal, Signal::StrongBuy);
        assert_eq!(p.signal_strength, 0.8);
    }

    #[test]
    fn test_document_confidence_and_destination() {
        let p = Prediction::new(TradingPair::ETHUSDT, Utc::now(), 2000.0, 1999.0, 0.05, 0.04, 90);
        assert_eq!(p.trading_signal, Signal::Hold);

        let doc = PredictionDocument::from_prediction(&p, 3600, 19);
        assert!((doc.confidence_level - 0.95).abs() < 1e-9);
        assert_eq!(doc.prediction_type, "realtime_gbt");

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("@timestamp").is_some());
        assert_eq!(json["trading_signal"], "HOLD");
        assert!(p.destination().starts_with("binance-predictions-"));
    }
}
