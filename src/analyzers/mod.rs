pub mod atr_breakout;
pub mod bollinger_band;
pub mod ema_trend;
pub mod macd_cross;
pub mod rsi_momentum;
pub mod volume_surge;

use tracing::debug;

use crate::config::{AnalyzerConfig, AnalyzerFailureMode, IndicatorSettings};
use crate::error::{EngineError, Result};
use crate::indicators::IndicatorCache;
use crate::types::{AnalyzerSignal, Candle, SignalDirection};

/// The closed universe of analyzers. Each variant is a pure function of the
/// candle window it is handed; extending the engine means adding a variant
/// here and a dispatch arm below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyzerKind {
    EmaTrend,
    RsiMomentum,
    MacdCross,
    BollingerBand,
    VolumeSurge,
    AtrBreakout,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 6] = [
        AnalyzerKind::EmaTrend,
        AnalyzerKind::RsiMomentum,
        AnalyzerKind::MacdCross,
        AnalyzerKind::BollingerBand,
        AnalyzerKind::VolumeSurge,
        AnalyzerKind::AtrBreakout,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerKind::EmaTrend => "ema_trend",
            AnalyzerKind::RsiMomentum => "rsi_momentum",
            AnalyzerKind::MacdCross => "macd_cross",
            AnalyzerKind::BollingerBand => "bollinger_band",
            AnalyzerKind::VolumeSurge => "volume_surge",
            AnalyzerKind::AtrBreakout => "atr_breakout",
        }
    }

    pub fn from_name(name: &str) -> Option<AnalyzerKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Minimum window length this analyzer needs before it is ready.
    pub fn min_candles_required(&self, indicators: &IndicatorSettings) -> usize {
        match self {
            AnalyzerKind::EmaTrend => indicators.ema_slow_period.max(indicators.ema_fast_period),
            AnalyzerKind::RsiMomentum => indicators.rsi_period + 1,
            AnalyzerKind::MacdCross => {
                indicators.macd_slow_period + indicators.macd_signal_period
            }
            AnalyzerKind::BollingerBand => indicators.bollinger_period,
            AnalyzerKind::VolumeSurge => indicators.volume_period + 1,
            AnalyzerKind::AtrBreakout => {
                (indicators.breakout_lookback + 1).max(indicators.atr_period + 1)
            }
        }
    }

    /// Evaluate the analyzer over the window. Returns a direction with a
    /// confidence in 0..=100; `Hold` means no setup.
    pub fn evaluate(&self, ctx: &mut AnalyzerContext<'_>) -> Result<(SignalDirection, f64)> {
        match self {
            AnalyzerKind::EmaTrend => ema_trend::evaluate(ctx),
            AnalyzerKind::RsiMomentum => rsi_momentum::evaluate(ctx),
            AnalyzerKind::MacdCross => macd_cross::evaluate(ctx),
            AnalyzerKind::BollingerBand => bollinger_band::evaluate(ctx),
            AnalyzerKind::VolumeSurge => volume_surge::evaluate(ctx),
            AnalyzerKind::AtrBreakout => atr_breakout::evaluate(ctx),
        }
    }
}

/// Everything an analyzer may look at for one bar. `closes` and `volumes`
/// mirror `candles` and are extracted once per bar by the engine.
pub struct AnalyzerContext<'a> {
    pub candles: &'a [Candle],
    pub closes: &'a [f64],
    pub volumes: &'a [f64],
    pub indicators: &'a IndicatorSettings,
    pub cache: &'a mut IndicatorCache,
}

/// One registered analyzer with its vote parameters.
#[derive(Debug, Clone)]
pub struct RegisteredAnalyzer {
    pub kind: AnalyzerKind,
    pub weight: f64,
    pub priority: u32,
}

/// The analyzer registry selected by a strategy. Analyzers whose window is
/// too short are skipped; a failing analyzer is skipped (lenient) or aborts
/// the run (strict).
#[derive(Debug, Clone)]
pub struct AnalyzerSet {
    analyzers: Vec<RegisteredAnalyzer>,
    failure_mode: AnalyzerFailureMode,
    min_ready: usize,
}

impl AnalyzerSet {
    pub fn from_config(
        configs: &[AnalyzerConfig],
        failure_mode: AnalyzerFailureMode,
    ) -> Result<Self> {
        let mut analyzers = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            let kind = AnalyzerKind::from_name(&config.name).ok_or_else(|| {
                EngineError::Config(format!("unknown analyzer '{}'", config.name))
            })?;
            analyzers.push(RegisteredAnalyzer {
                kind,
                weight: config.weight,
                priority: config.priority,
            });
        }
        // Stable order: priority descending, then declaration order.
        analyzers.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self {
            analyzers,
            failure_mode,
            min_ready: 1,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Warm-up horizon: the largest `min_candles_required` of the set.
    pub fn warmup_candles(&self, indicators: &IndicatorSettings) -> usize {
        self.analyzers
            .iter()
            .map(|a| a.kind.min_candles_required(indicators))
            .max()
            .unwrap_or(0)
    }

    /// Run every ready analyzer over the window. Failed analyzers are
    /// recorded in `diagnostics` (lenient) or abort the bar (strict). Fewer
    /// ready analyzers than `min_ready` produces no signals at all.
    pub fn collect(
        &self,
        ctx: &mut AnalyzerContext<'_>,
        diagnostics: &mut Vec<String>,
    ) -> Result<Vec<AnalyzerSignal>> {
        let mut signals = Vec::with_capacity(self.analyzers.len());
        let mut ready = 0usize;

        for analyzer in &self.analyzers {
            if ctx.candles.len() < analyzer.kind.min_candles_required(ctx.indicators) {
                continue;
            }
            ready += 1;
            match analyzer.kind.evaluate(ctx) {
                Ok((direction, confidence)) => signals.push(AnalyzerSignal {
                    source: analyzer.kind.name().to_string(),
                    direction,
                    confidence: confidence.clamp(0.0, 100.0),
                    weight: analyzer.weight,
                    priority: analyzer.priority,
                }),
                Err(err) => match self.failure_mode {
                    AnalyzerFailureMode::Lenient => {
                        debug!("analyzer {} skipped: {err}", analyzer.kind.name());
                        diagnostics.push(format!(
                            "analyzer {} skipped: {err}",
                            analyzer.kind.name()
                        ));
                    }
                    AnalyzerFailureMode::Strict => return Err(err),
                },
            }
        }

        if ready < self.min_ready {
            return Ok(Vec::new());
        }
        Ok(signals)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::types::Candle;

    /// Flat synthetic series at a constant close with a small range.
    pub fn flat_candles(n: usize, close: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp_ms: i as i64 * 300_000,
                open: close,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume: 100.0,
            })
            .collect()
    }

    /// Monotone rising series with step `step` per bar.
    pub fn rising_candles(n: usize, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                Candle {
                    timestamp_ms: i as i64 * 300_000,
                    open: close - step,
                    high: close + step * 0.2,
                    low: close - step * 1.2,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    pub fn falling_candles(n: usize, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = start - step * i as f64;
                Candle {
                    timestamp_ms: i as i64 * 300_000,
                    open: close + step,
                    high: close + step * 1.2,
                    low: close - step * 0.2,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;

    fn analyzer_config(name: &str, weight: f64, priority: u32) -> AnalyzerConfig {
        AnalyzerConfig {
            name: name.to_string(),
            enabled: true,
            weight,
            priority,
        }
    }

    #[test]
    fn names_round_trip() {
        for kind in AnalyzerKind::ALL {
            assert_eq!(AnalyzerKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(AnalyzerKind::from_name("nope"), None);
    }

    #[test]
    fn unknown_analyzer_is_a_config_error() {
        let configs = vec![analyzer_config("mystery", 0.5, 0)];
        assert!(AnalyzerSet::from_config(&configs, AnalyzerFailureMode::Lenient).is_err());
    }

    #[test]
    fn disabled_analyzers_are_not_registered() {
        let mut config = analyzer_config("ema_trend", 0.5, 0);
        config.enabled = false;
        let set = AnalyzerSet::from_config(&[config], AnalyzerFailureMode::Lenient).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn priority_orders_collection() {
        let configs = vec![
            analyzer_config("ema_trend", 0.5, 0),
            analyzer_config("rsi_momentum", 0.5, 9),
        ];
        let set = AnalyzerSet::from_config(&configs, AnalyzerFailureMode::Lenient).unwrap();
        assert_eq!(set.analyzers[0].kind, AnalyzerKind::RsiMomentum);
    }

    #[test]
    fn short_window_produces_no_signals() {
        let configs = vec![analyzer_config("rsi_momentum", 1.0, 0)];
        let set = AnalyzerSet::from_config(&configs, AnalyzerFailureMode::Lenient).unwrap();

        let candles = testutil::flat_candles(3, 100.0);
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
        let mut diagnostics = Vec::new();
        // rsi needs 15 candles with the default period; only 3 supplied.
        let signals = set.collect(&mut ctx, &mut diagnostics).unwrap();
        assert!(signals.is_empty());
    }

    #[test]
    fn warmup_is_max_of_requirements() {
        let configs = vec![
            analyzer_config("ema_trend", 0.5, 0),
            analyzer_config("macd_cross", 0.5, 0),
        ];
        let set = AnalyzerSet::from_config(&configs, AnalyzerFailureMode::Lenient).unwrap();
        let indicators = IndicatorSettings::default();
        // macd: 26 + 9 = 35 dominates ema's 21.
        assert_eq!(set.warmup_candles(&indicators), 35);
    }
}
