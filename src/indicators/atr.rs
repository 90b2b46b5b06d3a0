use crate::types::Candle;

/// Average true range with Wilder smoothing over the window.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut value = 0.0;
    for (i, pair) in candles.windows(2).enumerate() {
        let tr = true_range(&pair[1], pair[0].close);
        if i < period {
            value += tr;
            if i == period - 1 {
                value /= period as f64;
            }
        } else {
            value = (value * (period as f64 - 1.0) + tr) / period as f64;
        }
    }
    Some(value)
}

/// ATR expressed as a percentage of the latest close.
pub fn atr_percent(candles: &[Candle], period: usize) -> Option<f64> {
    let value = atr(candles, period)?;
    let close = candles.last()?.close;
    if close == 0.0 {
        return None;
    }
    Some(value / close * 100.0)
}

fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp_ms: 0,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn atr_of_constant_range_bars() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(102.0, 98.0, 100.0)).collect();
        let value = atr(&candles, 14).unwrap();
        assert!((value - 4.0).abs() < 1e-9);
    }

    #[test]
    fn atr_percent_scales_by_close() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(102.0, 98.0, 100.0)).collect();
        let pct = atr_percent(&candles, 14).unwrap();
        assert!((pct - 4.0).abs() < 1e-9);
    }

    #[test]
    fn gap_bars_extend_true_range() {
        // A gap above the prior close makes TR larger than high-low.
        let mut candles: Vec<Candle> = (0..15).map(|_| candle(101.0, 99.0, 100.0)).collect();
        candles.push(candle(111.0, 110.0, 110.5));
        let value = atr(&candles, 14).unwrap();
        assert!(value > 2.0);
    }
}
