pub mod bollinger;
pub mod macd;
pub mod rsi;

pub use bollinger::*;
pub use macd::*;
pub use rsi::*;

// All helpers operate on the price history strictly before the row being
// built, so they never see the value they will be asked to predict.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`).
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn tail(history: &[f64], period: usize) -> Option<&[f64]> {
    if period == 0 || history.len() < period {
        return None;
    }
    Some(&history[history.len() - period..])
}

/// Mean of the last `period` values, or the latest value when the history is
/// shorter than `period`.
pub fn sma_or_last(history: &[f64], period: usize) -> f64 {
    match tail(history, period) {
        Some(window) => mean(window),
        None => history.last().copied().unwrap_or(0.0),
    }
}

/// Last one-step change, 0 with fewer than two values.
pub fn momentum(history: &[f64]) -> f64 {
    match history {
        [.., prev, last] => last - prev,
        _ => 0.0,
    }
}

/// Standard deviation of the last `period` values, 0 while the history is short.
pub fn volatility(history: &[f64], period: usize) -> f64 {
    tail(history, period).map(stddev).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stddev() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
        // Population std of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2
        assert!((stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_sma_degrades_to_last_value() {
        let history = [1.0, 2.0, 3.0, 4.0];
        assert!((sma_or_last(&history, 3) - 3.0).abs() < 1e-12);
        assert_eq!(sma_or_last(&history, 5), 4.0);
    }

    #[test]
    fn test_momentum_and_volatility() {
        assert_eq!(momentum(&[5.0]), 0.0);
        assert_eq!(momentum(&[5.0, 7.5]), 2.5);
        assert_eq!(volatility(&[1.0, 2.0, 3.0], 5), 0.0);
        assert_eq!(volatility(&[9.0, 3.0, 3.0, 3.0, 3.0, 3.0], 5), 0.0);
    }
}
