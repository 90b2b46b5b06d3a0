/// Exponential moving average over the full window, seeded with the SMA of
/// the first `period` values. Returns the final EMA value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    let alpha = 2.0 / (period as f64 + 1.0);

    let mut value = seed;
    for v in &values[period..] {
        value = (v - value) * alpha + value;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_of_constant_series_is_the_constant() {
        let values = [5.0; 30];
        let result = ema(&values, 10).unwrap();
        assert!((result - 5.0).abs() < 1e-12);
    }

    #[test]
    fn ema_tracks_rising_series_below_last_value() {
        let values: Vec<f64> = (1..=50).map(|i| i as f64).collect();
        let result = ema(&values, 10).unwrap();
        assert!(result < 50.0);
        assert!(result > 40.0);
    }

    #[test]
    fn short_window_yields_none() {
        assert_eq!(ema(&[1.0, 2.0], 5), None);
    }
}
