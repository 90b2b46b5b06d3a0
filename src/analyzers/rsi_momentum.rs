use crate::error::Result;
use crate::indicators::{rsi, IndicatorKind};
use crate::types::{SignalDirection, Timeframe};

use super::AnalyzerContext;

/// Mean-reversion RSI vote: oversold proposes a LONG, overbought a SHORT,
/// with confidence scaled by how far the threshold is exceeded.
pub fn evaluate(ctx: &mut AnalyzerContext<'_>) -> Result<(SignalDirection, f64)> {
    let period = ctx.indicators.rsi_period;
    let value = match ctx.cache.get_or_compute(
        (IndicatorKind::Rsi, period as u32, Timeframe::PRIMARY),
        || rsi(ctx.closes, period),
    ) {
        Some(v) => v,
        None => return Ok((SignalDirection::Hold, 0.0)),
    };

    let oversold = ctx.indicators.rsi_oversold;
    let overbought = ctx.indicators.rsi_overbought;

    if value < oversold {
        let confidence = (55.0 + (oversold - value) * 1.5).min(95.0);
        return Ok((SignalDirection::Long, confidence));
    }
    if value > overbought {
        let confidence = (55.0 + (value - overbought) * 1.5).min(95.0);
        return Ok((SignalDirection::Short, confidence));
    }
    Ok((SignalDirection::Hold, 0.0))
}
