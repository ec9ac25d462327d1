/// Floor applied to the average loss when no losses were observed.
pub const MIN_AVG_LOSS: f64 = 0.001;

/// Relative strength index from up to `period` one-step changes at the end of
/// `history`, using simple averages.
///
/// Only positive changes count as gains; every other change contributes its
/// negation to losses. An all-gain window therefore saturates near 100 rather
/// than dividing by zero.
pub fn simple_rsi(history: &[f64], period: usize) -> f64 {
    let n = history.len();
    let start = n.saturating_sub(period).max(1);

    let mut gains = Vec::new();
    let mut losses = Vec::new();
    for j in start..n {
        let change = history[j] - history[j - 1];
        if change > 0.0 {
            gains.push(change);
        } else {
            losses.push(-change);
        }
    }

    let avg_gain = if gains.is_empty() {
        0.0
    } else {
        gains.iter().sum::<f64>() / gains.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        MIN_AVG_LOSS
    } else {
        losses.iter().sum::<f64>() / losses.len() as f64
    };
    let avg_loss = if avg_loss == 0.0 { MIN_AVG_LOSS } else { avg_loss };

    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_all_gains_saturates() {
        let history: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let rsi = simple_rsi(&history, 14);
        assert!(rsi > 99.9 && rsi < 100.0);
    }

    #[test]
    fn test_rsi_all_losses_is_zero() {
        let history: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(simple_rsi(&history, 14), 0.0);
    }

    #[test]
    fn test_rsi_flat_history() {
        // No gains, zero losses: 100 - 100 / (1 + 0 / 0.001)
        assert_eq!(simple_rsi(&[5.0; 10], 14), 0.0);
        assert_eq!(simple_rsi(&[5.0], 14), 0.0);
    }

    #[test]
    fn test_rsi_balanced() {
        let history = [10.0, 11.0, 10.0, 11.0, 10.0];
        // Gains [1, 1], losses [1, 1]
        assert!((simple_rsi(&history, 14) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_window_is_bounded() {
        // The early crash falls outside the 14-change window.
        let mut history = vec![100.0, 10.0];
        history.extend((0..15).map(|i| 10.0 + i as f64));
        let rsi = simple_rsi(&history, 14);
        assert!(rsi > 99.9);
    }
}
