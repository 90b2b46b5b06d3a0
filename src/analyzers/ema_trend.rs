use crate::error::Result;
use crate::indicators::{ema, IndicatorKind};
use crate::types::{SignalDirection, Timeframe};

use super::AnalyzerContext;

/// Spread below this (percent of the slow EMA) is treated as no trend.
const MIN_SPREAD_PCT: f64 = 0.05;

/// Fast/slow EMA crossover. Direction follows the sign of the spread,
/// confidence grows with its magnitude.
pub fn evaluate(ctx: &mut AnalyzerContext<'_>) -> Result<(SignalDirection, f64)> {
    let fast_period = ctx.indicators.ema_fast_period;
    let slow_period = ctx.indicators.ema_slow_period;

    let fast = ctx.cache.get_or_compute(
        (IndicatorKind::Ema, fast_period as u32, Timeframe::PRIMARY),
        || ema(ctx.closes, fast_period),
    );
    let slow = ctx.cache.get_or_compute(
        (IndicatorKind::Ema, slow_period as u32, Timeframe::PRIMARY),
        || ema(ctx.closes, slow_period),
    );

    let (fast, slow) = match (fast, slow) {
        (Some(f), Some(s)) if s != 0.0 => (f, s),
        _ => return Ok((SignalDirection::Hold, 0.0)),
    };

    let spread_pct = (fast - slow) / slow * 100.0;
    if spread_pct.abs() < MIN_SPREAD_PCT {
        return Ok((SignalDirection::Hold, 0.0));
    }

    let confidence = (50.0 + spread_pct.abs() * 25.0).min(95.0);
    let direction = if spread_pct > 0.0 {
        SignalDirection::Long
    } else {
        SignalDirection::Short
    };
    Ok((direction, confidence))
}
