use crate::error::Result;
use crate::indicators::{bollinger, IndicatorKind};
use crate::types::{SignalDirection, Timeframe};

use super::AnalyzerContext;

/// Bollinger mean reversion: a close beyond a band proposes the reverting
/// direction, with confidence scaled by the penetration depth relative to
/// the band width.
pub fn evaluate(ctx: &mut AnalyzerContext<'_>) -> Result<(SignalDirection, f64)> {
    let period = ctx.indicators.bollinger_period;
    let std_mult = ctx.indicators.bollinger_std_dev;

    let upper_key = (
        IndicatorKind::BollingerUpper,
        period as u32,
        Timeframe::PRIMARY,
    );
    let lower_key = (
        IndicatorKind::BollingerLower,
        period as u32,
        Timeframe::PRIMARY,
    );

    let (upper, lower) = match (ctx.cache.get(&upper_key), ctx.cache.get(&lower_key)) {
        (Some(u), Some(l)) => (u, l),
        _ => {
            let bands = match bollinger(ctx.closes, period, std_mult) {
                Some(b) => b,
                None => return Ok((SignalDirection::Hold, 0.0)),
            };
            ctx.cache.set(upper_key, bands.upper);
            ctx.cache.set(lower_key, bands.lower);
            (bands.upper, bands.lower)
        }
    };

    let close = match ctx.closes.last() {
        Some(&c) => c,
        None => return Ok((SignalDirection::Hold, 0.0)),
    };
    let width = upper - lower;
    if width <= 0.0 {
        return Ok((SignalDirection::Hold, 0.0));
    }

    if close < lower {
        let depth = (lower - close) / width;
        return Ok((SignalDirection::Long, (55.0 + depth * 100.0).min(95.0)));
    }
    if close > upper {
        let depth = (close - upper) / width;
        return Ok((SignalDirection::Short, (55.0 + depth * 100.0).min(95.0)));
    }
    Ok((SignalDirection::Hold, 0.0))
}
