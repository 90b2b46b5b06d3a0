pub mod atr;
pub mod bollinger;
pub mod cache;
pub mod ema;
pub mod macd;
pub mod rsi;

pub use atr::*;
pub use bollinger::*;
pub use cache::*;
pub use ema::*;
pub use macd::*;
pub use rsi::*;

/// Indicator kinds addressable through the cache. MACD caches its line and
/// signal separately since cache values are scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Ema,
    Rsi,
    Atr,
    MacdLine,
    MacdSignal,
    BollingerUpper,
    BollingerLower,
    VolumeSma,
}

pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

pub fn highest(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    values
        .iter()
        .rev()
        .take(period)
        .copied()
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        })
}

pub fn lowest(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    values
        .iter()
        .rev()
        .take(period)
        .copied()
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        })
}

pub fn stddev(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: f64 = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / period as f64;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_over_trailing_window() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 3), Some(4.0));
        assert_eq!(sma(&values, 5), Some(3.0));
        assert_eq!(sma(&values, 6), None);
    }

    #[test]
    fn highest_and_lowest() {
        let values = [3.0, 1.0, 4.0, 1.5, 2.0];
        assert_eq!(highest(&values, 3), Some(4.0));
        assert_eq!(lowest(&values, 3), Some(1.5));
        assert_eq!(highest(&values, 0), None);
    }

    #[test]
    fn stddev_of_constant_series_is_zero() {
        let values = [2.0; 10];
        assert_eq!(stddev(&values, 5), Some(0.0));
    }
}
