use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TradingPair {
    BTCUSDT,
    ETHUSDT,
    SOLUSDT,
    BNBUSDT,
}

impl TradingPair {
    pub const ALL: [TradingPair; 4] = [
        TradingPair::BTCUSDT,
        TradingPair::ETHUSDT,
        TradingPair::SOLUSDT,
        TradingPair::BNBUSDT,
    ];

    pub const QUOTE: &'static str = "USDT";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BTCUSDT => "BTCUSDT",
            Self::ETHUSDT => "ETHUSDT",
            Self::SOLUSDT => "SOLUSDT",
            Self::BNBUSDT => "BNBUSDT",
        }
    }

    /// Symbol with the quote currency stripped, e.g. `BTC`
    pub fn base_asset(&self) -> &'static str {
        let symbol = self.as_str();
        &symbol[..symbol.len() - Self::QUOTE.len()]
    }

    /// Case-insensitive lookup of an exchange symbol.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|pair| pair.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Raw trade stream name, e.g. `btcusdt@trade`
    pub fn trade_stream(&self) -> String {
        format!("{}@trade", self.as_str().to_lowercase())
    }

    /// Append-only log file for this pair, e.g. `btc_usdt.ndjson`
    pub fn log_file_name(&self) -> String {
        format!(
            "{}_{}.ndjson",
            self.base_asset().to_lowercase(),
            Self::QUOTE.to_lowercase()
        )
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Aggressor side of a trade. A buyer acting as maker means the taker sold.
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Bucket width in milliseconds.
    pub fn to_milliseconds(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        let minutes = match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::H1 => 60,
            Self::H4 => 4 * 60,
            Self::D1 => 24 * 60,
        };
        minutes * MINUTE
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Discrete trading signal derived from a predicted percentage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Signal {
    pub fn from_change_pct(change_pct: f64) -> Self {
        if change_pct > 2.0 {
            Signal::StrongBuy
        } else if change_pct > 0.5 {
            Signal::Buy
        } else if change_pct < -2.0 {
            Signal::StrongSell
        } else if change_pct < -0.5 {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }

    /// Confidence-like score in [0, 1] from the magnitude of the change.
    pub fn strength_for(change_pct: f64) -> f64 {
        let abs_change = change_pct.abs();
        if abs_change > 5.0 {
            1.0
        } else if abs_change > 2.0 {
            0.8
        } else if abs_change > 1.0 {
            0.6
        } else if abs_change > 0.5 {
            0.4
        } else {
            0.2
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::StrongBuy => "STRONG_BUY",
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Sell => "SELL",
            Signal::StrongSell => "STRONG_SELL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
