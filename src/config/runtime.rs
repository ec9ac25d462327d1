use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::PredictorSettings;
use crate::exchange::{BINANCE_API, BINANCE_WS};
use crate::ingest::IngestSettings;
use crate::ml::{GbtParams, TrainerConfig};
use crate::types::{TimeFrame, TradingPair};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamSettings,
    pub collector: CollectorSettings,
    pub depth: DepthSettings,
    pub model: ModelSettings,
    pub scheduler: SchedulerSettings,
    pub persistence: PersistenceSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Stream validation
        if self.stream.symbols.is_empty() {
            errors.push("stream.symbols must list at least one symbol".to_string());
        }
        let mut seen = Vec::new();
        for symbol in &self.stream.symbols {
            if seen.contains(symbol) {
                errors.push(format!("stream.symbols lists {} more than once", symbol));
            }
            seen.push(*symbol);
        }
        if self.stream.websocket_url.trim().is_empty() {
            errors.push("stream.websocket_url is required".to_string());
        }
        if self.stream.data_dir.as_os_str().is_empty() {
            errors.push("stream.data_dir is required".to_string());
        }

        if self.collector.enabled && self.collector.url.trim().is_empty() {
            errors.push("collector.url is required when the collector is enabled".to_string());
        }
        if self.collector.timeout_secs == 0 {
            errors.push("collector.timeout_secs must be > 0".to_string());
        }
        if self.depth.enabled && (self.depth.limit == 0 || self.depth.timeout_secs == 0) {
            errors.push("depth.limit and depth.timeout_secs must be > 0".to_string());
        }

        // Model validation
        let model = &self.model;
        if model.lookback_hours == 0 {
            errors.push("model.lookback_hours must be > 0".to_string());
        }
        if model.max_records == 0 {
            errors.push("model.max_records must be > 0".to_string());
        }
        if model.lookback_window == 0 {
            errors.push("model.lookback_window must be > 0".to_string());
        }
        if !(model.train_split > 0.0 && model.train_split < model.validation_split
            && model.validation_split < 1.0)
        {
            errors.push("model splits must satisfy 0 < train_split < validation_split < 1".to_string());
        }
        if let Err(e) = model.gbt.validate() {
            errors.push(format!("model.gbt: {}", e));
        }

        if self.scheduler.interval_secs == 0 {
            errors.push("scheduler.interval_secs must be > 0".to_string());
        }
        if self.scheduler.max_predictions == Some(0) {
            errors.push("scheduler.max_predictions must be > 0 when set".to_string());
        }

        if self.persistence.enabled && self.persistence.database_url.trim().is_empty() {
            errors.push("persistence.database_url is required when persistence is enabled".to_string());
        }
        if self.persistence.timeout_secs == 0 {
            errors.push("persistence.timeout_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            data_dir: self.stream.data_dir.clone(),
            fsync: self.stream.fsync,
            reconnect_delay: Duration::from_secs(self.stream.reconnect_delay_secs),
            push_timeout: Duration::from_secs(self.collector.timeout_secs),
            depth_limit: self.depth.limit,
        }
    }

    pub fn predictor_settings(&self) -> PredictorSettings {
        PredictorSettings {
            symbol: self.model.symbol,
            timeframe: self.model.bar_timeframe,
            lookback: self.model.lookback(),
            max_records: self.model.max_records,
            interval_secs: self.scheduler.interval_secs,
            persist_timeout: Duration::from_secs(self.persistence.timeout_secs),
            history_dir: self.scheduler.history_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub symbols: Vec<TradingPair>,
    pub websocket_url: String,
    pub data_dir: PathBuf,
    pub reconnect_delay_secs: u64,
    pub fsync: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            symbols: vec![TradingPair::BTCUSDT, TradingPair::ETHUSDT, TradingPair::SOLUSDT],
            websocket_url: BINANCE_WS.to_string(),
            data_dir: PathBuf::from("data"),
            reconnect_delay_secs: 5,
            fsync: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub enabled: bool,
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:5000".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthSettings {
    pub enabled: bool,
    pub rest_url: String,
    pub limit: u32,
    pub timeout_secs: u64,
}

impl Default for DepthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rest_url: BINANCE_API.to_string(),
            limit: 5,
            timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub symbol: TradingPair,
    pub bar_timeframe: TimeFrame,
    pub lookback_hours: u64,
    /// Upper bound on bars handed to the trainer, newest kept.
    pub max_records: usize,
    pub lookback_window: usize,
    pub min_price_points: usize,
    pub min_feature_rows: usize,
    pub train_split: f64,
    pub validation_split: f64,
    pub gbt: GbtParams,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let trainer = TrainerConfig::default();
        Self {
            symbol: TradingPair::BTCUSDT,
            bar_timeframe: TimeFrame::H1,
            lookback_hours: 168,
            max_records: 50_000,
            lookback_window: trainer.lookback_window,
            min_price_points: trainer.min_price_points,
            min_feature_rows: trainer.min_feature_rows,
            train_split: trainer.train_split,
            validation_split: trainer.validation_split,
            gbt: trainer.gbt,
        }
    }
}

impl ModelSettings {
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            lookback_window: self.lookback_window,
            min_price_points: self.min_price_points,
            min_feature_rows: self.min_feature_rows,
            train_split: self.train_split,
            validation_split: self.validation_split,
            gbt: self.gbt.clone(),
        }
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
    pub max_predictions: Option<u32>,
    pub min_bars: usize,
    pub history_dir: PathBuf,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_predictions: Some(10),
            min_bars: 20,
            history_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub enabled: bool,
    pub database_url: String,
    pub timeout_secs: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: "sqlite:./predictions.db".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
