use crate::error::Result;
use crate::indicators::{atr, highest, lowest, IndicatorKind};
use crate::types::{SignalDirection, Timeframe};

use super::AnalyzerContext;

/// Range breakout: a close beyond the highest high / lowest low of the
/// lookback (excluding the current bar) votes with the breakout, with
/// confidence scaled by the ATR-normalized breakout distance.
pub fn evaluate(ctx: &mut AnalyzerContext<'_>) -> Result<(SignalDirection, f64)> {
    let lookback = ctx.indicators.breakout_lookback;
    let atr_period = ctx.indicators.atr_period;

    if ctx.candles.len() < lookback + 1 {
        return Ok((SignalDirection::Hold, 0.0));
    }
    let bar = match ctx.candles.last() {
        Some(bar) => bar,
        None => return Ok((SignalDirection::Hold, 0.0)),
    };

    let history = &ctx.candles[ctx.candles.len() - 1 - lookback..ctx.candles.len() - 1];
    let highs: Vec<f64> = history.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = history.iter().map(|c| c.low).collect();
    let (highest_high, lowest_low) = match (highest(&highs, lookback), lowest(&lows, lookback)) {
        (Some(h), Some(l)) => (h, l),
        _ => return Ok((SignalDirection::Hold, 0.0)),
    };

    let atr_value = match ctx.cache.get_or_compute(
        (IndicatorKind::Atr, atr_period as u32, Timeframe::PRIMARY),
        || atr(ctx.candles, atr_period),
    ) {
        Some(v) if v > 0.0 => v,
        _ => return Ok((SignalDirection::Hold, 0.0)),
    };

    if bar.close > highest_high {
        let strength = (bar.close - highest_high) / atr_value;
        return Ok((SignalDirection::Long, (55.0 + strength * 25.0).min(95.0)));
    }
    if bar.close < lowest_low {
        let strength = (lowest_low - bar.close) / atr_value;
        return Ok((SignalDirection::Short, (55.0 + strength * 25.0).min(95.0)));
    }
    Ok((SignalDirection::Hold, 0.0))
}
