//! Pearson correlation over return series and the benchmark-alignment
//! predicate used by the correlation filter.

use crate::types::{Candle, Direction};

/// Simple per-bar returns from a close series.
pub fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { (w[1] - w[0]) / w[0] })
        .collect()
}

/// Pearson correlation coefficient of two equally long series. Returns
/// `None` for series shorter than two points, mismatched lengths, or zero
/// variance on either side.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkTrend {
    Up,
    Down,
    Flat,
}

/// Benchmark trend over the lookback: the sign of `close_end − close_start`.
pub fn benchmark_trend(candles: &[Candle]) -> BenchmarkTrend {
    match (candles.first(), candles.last()) {
        (Some(first), Some(last)) => {
            if last.close > first.close {
                BenchmarkTrend::Up
            } else if last.close < first.close {
                BenchmarkTrend::Down
            } else {
                BenchmarkTrend::Flat
            }
        }
        _ => BenchmarkTrend::Flat,
    }
}

/// A LONG is misaligned when the benchmark trends down while the asset is
/// positively correlated with it at or above `threshold`; symmetrically a
/// SHORT is misaligned against an up-trending, positively correlated
/// benchmark. Below the threshold the caller fails open.
pub fn is_misaligned(
    direction: Direction,
    correlation: f64,
    trend: BenchmarkTrend,
    threshold: f64,
) -> bool {
    if correlation.abs() < threshold || correlation <= 0.0 {
        return false;
    }
    matches!(
        (direction, trend),
        (Direction::Long, BenchmarkTrend::Down) | (Direction::Short, BenchmarkTrend::Up)
    )
}
