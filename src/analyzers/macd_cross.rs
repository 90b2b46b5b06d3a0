use crate::error::Result;
use crate::indicators::{macd, IndicatorKind};
use crate::types::{SignalDirection, Timeframe};

use super::AnalyzerContext;

/// MACD line/signal cross with histogram confirmation. Confidence grows with
/// the histogram magnitude normalized by price.
pub fn evaluate(ctx: &mut AnalyzerContext<'_>) -> Result<(SignalDirection, f64)> {
    let fast = ctx.indicators.macd_fast_period;
    let slow = ctx.indicators.macd_slow_period;
    let signal_period = ctx.indicators.macd_signal_period;

    // Line and signal are cached under separate kinds; both come from the
    // same computation, so seed the cache together on a miss.
    let cached_line = ctx
        .cache
        .get(&(IndicatorKind::MacdLine, fast as u32, Timeframe::PRIMARY));
    let cached_signal = ctx
        .cache
        .get(&(IndicatorKind::MacdSignal, fast as u32, Timeframe::PRIMARY));

    let (line, signal) = match (cached_line, cached_signal) {
        (Some(line), Some(signal)) => (line, signal),
        _ => {
            let out = match macd(ctx.closes, fast, slow, signal_period) {
                Some(out) => out,
                None => return Ok((SignalDirection::Hold, 0.0)),
            };
            ctx.cache.set(
                (IndicatorKind::MacdLine, fast as u32, Timeframe::PRIMARY),
                out.line,
            );
            ctx.cache.set(
                (IndicatorKind::MacdSignal, fast as u32, Timeframe::PRIMARY),
                out.signal,
            );
            (out.line, out.signal)
        }
    };

    let close = match ctx.closes.last() {
        Some(&c) if c != 0.0 => c,
        _ => return Ok((SignalDirection::Hold, 0.0)),
    };

    let histogram = line - signal;
    let histogram_pct = histogram / close * 100.0;
    if histogram_pct.abs() < 0.01 {
        return Ok((SignalDirection::Hold, 0.0));
    }

    let confidence = (55.0 + histogram_pct.abs() * 40.0).min(95.0);
    let direction = if histogram > 0.0 {
        SignalDirection::Long
    } else {
        SignalDirection::Short
    };
    Ok((direction, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::testutil::{falling_candles, flat_candles, rising_candles};
    use crate::config::IndicatorSettings;
    use crate::indicators::IndicatorCache;

    fn run(candles: &[crate::types::Candle]) -> (SignalDirection, f64) {
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
    fn accelerating_rise_votes_long() {
        // Quadratic rise keeps the MACD line above its signal.
        let candles: Vec<crate::types::Candle> = (0..80)
            .map(|i| {
                let close = 100.0 + (i as f64) * (i as f64) * 0.01;
                crate::types::Candle {
                    timestamp_ms: i * 300_000,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 100.0,
                }
            })
            .collect();
        let (direction, _) = run(&candles);
        assert_eq!(direction, SignalDirection::Long);
    }

    #[test]
    fn steady_fall_votes_short_or_holds() {
        let candles = falling_candles(80, 500.0, 1.0);
        let (direction, _) = run(&candles);
        // A perfectly linear fall converges line == signal; any vote must be
        // SHORT, never LONG.
        assert_ne!(direction, SignalDirection::Long);
    }

    #[test]
    fn flat_market_holds() {
        let candles = flat_candles(80, 100.0);
        let (direction, _) = run(&candles);
        assert_eq!(direction, SignalDirection::Hold);
    }

    #[test]
    fn long_vote_survives_cache_round_trip() {
        let candles = rising_candles(80, 100.0, 2.0);
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let indicators = IndicatorSettings::default();
        let mut cache = IndicatorCache::new();
        let mut ctx = AnalyzerContext {
            candles: &candles,
            closes: &closes,
            volumes: &volumes,
            indicators: &indicators,
            cache: &mut cache,
        };
        let first = evaluate(&mut ctx).unwrap();
        let second = evaluate(&mut ctx).unwrap();
        assert_eq!(first, second);
    }
}
