use anyhow::{anyhow, Result};
use ndarray::{Array1, Array2};

use crate::indicators::{
    bollinger, convergence_divergence, momentum, simple_rsi, sma_or_last, volatility,
    BOLLINGER_K, BOLLINGER_PERIOD, FAST_PERIOD, SLOW_PERIOD,
};

pub const DEFAULT_LOOKBACK: usize = 10;
const RSI_PERIOD: usize = 14;
const VOLATILITY_PERIOD: usize = 5;

/// One training/prediction sample: the raw price window followed by the
/// indicator columns computed over the same history.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub window: Vec<f64>,
    pub sma_3: f64,
    pub sma_5: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub rsi: f64,
    pub macd: f64,
    pub bb_middle: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
}

impl FeatureRow {
    pub const INDICATOR_COUNT: usize = 9;

    /// Builds the row describing position `i` of `prices` from `prices[..i]` only.
    pub fn at(prices: &[f64], i: usize, lookback: usize) -> Self {
        let history = &prices[..i];
        let bands = bollinger(history, BOLLINGER_PERIOD, BOLLINGER_K);
        Self {
            window: prices[i - lookback..i].to_vec(),
            sma_3: sma_or_last(history, 3),
            sma_5: sma_or_last(history, 5),
            momentum: momentum(history),
            volatility: volatility(history, VOLATILITY_PERIOD),
            rsi: simple_rsi(history, RSI_PERIOD),
            macd: convergence_divergence(history, FAST_PERIOD, SLOW_PERIOD),
            bb_middle: bands.middle,
            bb_upper: bands.upper,
            bb_lower: bands.lower,
        }
    }

    pub fn width(lookback: usize) -> usize {
        lookback + Self::INDICATOR_COUNT
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.window.len() + Self::INDICATOR_COUNT);
        out.extend_from_slice(&self.window);
        out.extend_from_slice(&[
            self.sma_3,
            self.sma_5,
            self.momentum,
            self.volatility,
            self.rsi,
            self.macd,
            self.bb_middle,
            self.bb_upper,
            self.bb_lower,
        ]);
        out
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from(self.to_vec())
    }

    pub fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub rows: Vec<FeatureRow>,
    pub targets: Vec<f64>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn matrix(&self) -> Result<Array2<f64>> {
        let width = self.rows.first().map(|r| r.window.len() + FeatureRow::INDICATOR_COUNT).unwrap_or(0);
        let flat: Vec<f64> = self.rows.iter().flat_map(|r| r.to_vec()).collect();
        Array2::from_shape_vec((self.rows.len(), width), flat)
            .map_err(|e| anyhow!("Feature matrix shape error: {}", e))
    }

    pub fn target_array(&self) -> Array1<f64> {
        Array1::from(self.targets.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder {
    lookback: usize,
}

impl FeatureBuilder {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(1),
        }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// `max(0, N - lookback)` rows; the target of row `i` is `prices[i]`.
    pub fn build(&self, prices: &[f64]) -> FeatureSet {
        let mut set = FeatureSet::default();
        for i in self.lookback..prices.len() {
            set.rows.push(FeatureRow::at(prices, i, self.lookback));
            set.targets.push(prices[i]);
        }
        set
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 / 10.0).collect()
    }

    #[test]
    fn test_row_counts() {
        let builder = FeatureBuilder::default();
        assert_eq!(builder.build(&ramp(15)).len(), 5);
        assert_eq!(builder.build(&ramp(5)).len(), 0);
        assert_eq!(builder.build(&ramp(10)).len(), 0);
    }

    #[test]
    fn test_row_layout_and_targets() {
        let prices = ramp(15);
        let set = FeatureBuilder::new(10).build(&prices);
        let first = &set.rows[0];

        assert_eq!(first.window, prices[0..10].to_vec());
        assert_eq!(set.targets[0], prices[10]);
        assert_eq!(first.to_vec().len(), FeatureRow::width(10));
        assert_eq!(FeatureRow::width(10), 19);

        // Row 10 sees prices[0..10] = 0.0..=0.9
        assert!((first.sma_3 - 0.8).abs() < 1e-12);
        assert!((first.momentum - 0.1).abs() < 1e-12);
        // Short of 20 samples, the bands collapse onto the last price
        assert_eq!(first.bb_middle, prices[9]);
        assert_eq!(first.bb_upper, prices[9]);
    }

    #[test]
    fn test_matrix_shape() {
        let set = FeatureBuilder::new(10).build(&ramp(40));
        let matrix = set.matrix().unwrap();
        assert_eq!(matrix.dim(), (30, 19));
        assert_eq!(set.target_array().len(), 30);
    }

    #[test]
    fn test_rows_ignore_future_prices() {
        let mut prices = ramp(30);
        let before = FeatureBuilder::new(10).build(&prices).rows[5].clone();
        prices[20] = 1_000.0;
        let after = FeatureBuilder::new(10).build(&prices).rows[5].clone();
        assert_eq!(before, after);
    }
}
