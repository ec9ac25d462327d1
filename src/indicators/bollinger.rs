use super::{mean, stddev};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerOutput {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;

/// Bands over the last `period` values; all three collapse onto the latest
/// value while the history is shorter than `period`.
pub fn bollinger(history: &[f64], period: usize, k: f64) -> BollingerOutput {
    if period == 0 || history.len() < period {
        let last = history.last().copied().unwrap_or(0.0);
        return BollingerOutput {
            upper: last,
            middle: last,
            lower: last,
        };
    }

    let window = &history[history.len() - period..];
    let middle = mean(window);
    let deviation = stddev(window) * k;
    BollingerOutput {
        upper: middle + deviation,
        middle,
        lower: middle - deviation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_history_collapses() {
        let out = bollinger(&[1.0, 2.0, 3.0], BOLLINGER_PERIOD, BOLLINGER_K);
        assert_eq!(out.middle, 3.0);
        assert_eq!(out.width(), 0.0);
    }

    #[test]
    fn test_bands_are_symmetric() {
        let history: Vec<f64> = (0..25).map(|i| (i % 4) as f64).collect();
        let out = bollinger(&history, BOLLINGER_PERIOD, BOLLINGER_K);
        assert!(out.upper > out.middle && out.middle > out.lower);
        assert!(((out.upper - out.middle) - (out.middle - out.lower)).abs() < 1e-12);
    }
}
