use super::ema::ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdOutput {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD over the window: `line = EMA(fast) − EMA(slow)`, `signal` is the EMA
/// of the line series, `histogram = line − signal`.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdOutput> {
    if fast >= slow || values.len() < slow + signal_period {
        return None;
    }

    // Line series for every index where both EMAs are defined.
    let mut line_series = Vec::with_capacity(values.len() - slow + 1);
    for end in slow..=values.len() {
        let window = &values[..end];
        let fast_val = ema(window, fast)?;
        let slow_val = ema(window, slow)?;
        line_series.push(fast_val - slow_val);
    }

    let line = *line_series.last()?;
    let signal = ema(&line_series, signal_period)?;
    Some(MacdOutput {
        line,
        signal,
        histogram: line - signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_positive_in_sustained_uptrend() {
        let values: Vec<f64> = (1..=80).map(|i| 100.0 + i as f64).collect();
        let out = macd(&values, 12, 26, 9).unwrap();
        assert!(out.line > 0.0);
        assert!(out.signal > 0.0);
    }

    #[test]
    fn macd_zero_on_flat_series() {
        let values = [50.0; 80];
        let out = macd(&values, 12, 26, 9).unwrap();
        assert!(out.line.abs() < 1e-12);
        assert!(out.histogram.abs() < 1e-12);
    }

    #[test]
    fn rejects_inverted_periods_and_short_windows() {
        let values = [1.0; 80];
        assert!(macd(&values, 26, 12, 9).is_none());
        assert!(macd(&values[..30], 12, 26, 9).is_none());
    }
}
