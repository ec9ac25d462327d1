use super::sma_or_last;

pub const FAST_PERIOD: usize = 12;
pub const SLOW_PERIOD: usize = 26;

/// Fast simple mean minus slow simple mean over the trailing history.
pub fn convergence_divergence(history: &[f64], fast: usize, slow: usize) -> f64 {
    sma_or_last(history, fast) - sma_or_last(history, slow)
}
