use crate::error::Result;
use crate::indicators::{sma, IndicatorKind};
use crate::types::{SignalDirection, Timeframe};

use super::AnalyzerContext;

/// Volume-confirmed move: when the latest bar's volume exceeds the surge
/// threshold times its moving average, vote in the bar's direction.
pub fn evaluate(ctx: &mut AnalyzerContext<'_>) -> Result<(SignalDirection, f64)> {
    let period = ctx.indicators.volume_period;
    let threshold = ctx.indicators.volume_surge_threshold;

    let bar = match ctx.candles.last() {
        Some(bar) => bar,
        None => return Ok((SignalDirection::Hold, 0.0)),
    };

    // Average excludes the current bar so the surge compares against the
    // preceding baseline.
    let history = &ctx.volumes[..ctx.volumes.len() - 1];
    let avg = match ctx.cache.get_or_compute(
        (IndicatorKind::VolumeSma, period as u32, Timeframe::PRIMARY),
        || sma(history, period),
    ) {
        Some(avg) if avg > 0.0 => avg,
        _ => return Ok((SignalDirection::Hold, 0.0)),
    };

    let ratio = bar.volume / avg;
    if ratio < threshold {
        return Ok((SignalDirection::Hold, 0.0));
    }

    let confidence = (50.0 + (ratio - threshold) * 20.0).min(95.0);
    if bar.is_bullish() {
        Ok((SignalDirection::Long, confidence))
    } else if bar.is_bearish() {
        Ok((SignalDirection::Short, confidence))
    } else {
        Ok((SignalDirection::Hold, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::testutil::flat_candles;
    use crate::config::IndicatorSettings;
    use crate::indicators::IndicatorCache;
    use crate::types::Candle;

    fn run(candles: &[Candle]) -> (SignalDirection, f64) {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let indicators = IndicatorSettings::default();
        let mut cache = IndicatorCache::new();
        let mut ctx = AnalyzerContext {
            candles,
            closes: &closes,
            volumes: &volumes,
            indicators: &indicators,
            cache: &mut cache,
        };
        evaluate(&mut ctx).unwrap()
    }

    #[test]
    fn bullish_surge_votes_long() {
        let mut candles = flat_candles(30, 100.0);
        let last = candles.last_mut().unwrap();
        last.open = 99.0;
        last.close = 101.0;
        last.volume = 500.0;
        let (direction, confidence) = run(&candles);
        assert_eq!(direction, SignalDirection::Long);
        assert!(confidence > 50.0);
    }

    #[test]
    fn bearish_surge_votes_short() {
        let mut candles = flat_candles(30, 100.0);
        let last = candles.last_mut().unwrap();
        last.open = 101.0;
        last.close = 99.0;
        last.volume = 500.0;
        let (direction, _) = run(&candles);
        assert_eq!(direction, SignalDirection::Short);
    }

    #[test]
    fn normal_volume_holds() {
        let candles = flat_candles(30, 100.0);
        let (direction, _) = run(&candles);
        assert_eq!(direction, SignalDirection::Hold);
    }

    #[test]
    fn doji_surge_holds() {
        let mut candles = flat_candles(30, 100.0);
        let last = candles.last_mut().unwrap();
        last.open = 100.0;
        last.close = 100.0;
        last.volume = 500.0;
        let (direction, _) = run(&candles);
        assert_eq!(direction, SignalDirection::Hold);
    }
}
