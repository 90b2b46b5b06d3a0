use tracing::debug;

use crate::config::{
    BtcCorrelationConfig, FiltersConfig, FlatMarketConfig, FundingRateConfig,
    NeutralTrendStrengthConfig, PostTpCooldownConfig, TimeOfDayConfig, TrendAlignmentConfig,
    VolatilityRegimeConfig,
};
use crate::correlation::{self, BenchmarkTrend};
use crate::error::{EngineError, Result};
use crate::types::{Candle, Direction, TrendAnalysis, TrendBias};

/// Outcome of one filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl FilterVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of the whole chain. The first blocking filter short-circuits and
/// is named in `blocked_by`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerdict {
    pub allowed: bool,
    pub blocked_by: Option<&'static str>,
    pub reason: Option<String>,
}

impl ChainVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            blocked_by: None,
            reason: None,
        }
    }
}

/// Timestamp and direction of the most recent take-profit fill, for the
/// post-TP cooldown filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastTakeProfit {
    pub timestamp_ms: i64,
    pub direction: Direction,
}

/// Everything a filter may look at for one candidate entry. All fields are
/// in-memory; filters perform no I/O.
pub struct FilterContext<'a> {
    pub direction: Direction,
    pub confidence: f64,
    pub bar: &'a Candle,
    /// Primary-timeframe window ending at the current bar.
    pub candles: &'a [Candle],
    /// Benchmark window aligned to the same end timestamp, if available.
    pub benchmark: Option<&'a [Candle]>,
    pub funding_rate: Option<f64>,
    pub trend: &'a TrendAnalysis,
    pub last_tp: Option<LastTakeProfit>,
    pub atr_percent: Option<f64>,
    pub flat_score: Option<f64>,
}

/// The closed universe of entry filters, in pipeline declaration order.
/// The blind-zone check is part of the aggregator and not repeated here.
#[derive(Debug, Clone)]
pub enum FilterKind {
    FlatMarket(FlatMarketConfig),
    FundingRate(FundingRateConfig),
    BtcCorrelation(BtcCorrelationConfig),
    TrendAlignment(TrendAlignmentConfig),
    PostTpCooldown(PostTpCooldownConfig),
    TimeOfDay(TimeOfDayConfig),
    VolatilityRegime(VolatilityRegimeConfig),
    NeutralTrendStrength(NeutralTrendStrengthConfig),
}

impl FilterKind {
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::FlatMarket(_) => "FlatMarket",
            FilterKind::FundingRate(_) => "FundingRate",
            FilterKind::BtcCorrelation(_) => "BtcCorrelation",
            FilterKind::TrendAlignment(_) => "TrendAlignment",
            FilterKind::PostTpCooldown(_) => "PostTpCooldown",
            FilterKind::TimeOfDay(_) => "TimeOfDay",
            FilterKind::VolatilityRegime(_) => "VolatilityRegime",
            FilterKind::NeutralTrendStrength(_) => "NeutralTrendStrength",
        }
    }

    fn evaluate(&self, ctx: &FilterContext<'_>) -> Result<FilterVerdict> {
        match self {
            FilterKind::FlatMarket(cfg) => Ok(flat_market(cfg, ctx)),
            FilterKind::FundingRate(cfg) => Ok(funding_rate(cfg, ctx)),
            FilterKind::BtcCorrelation(cfg) => btc_correlation(cfg, ctx),
            FilterKind::TrendAlignment(_) => Ok(trend_alignment(ctx)),
            FilterKind::PostTpCooldown(cfg) => Ok(post_tp_cooldown(cfg, ctx)),
            FilterKind::TimeOfDay(cfg) => Ok(time_of_day(cfg, ctx)),
            FilterKind::VolatilityRegime(cfg) => Ok(volatility_regime(cfg, ctx)),
            FilterKind::NeutralTrendStrength(cfg) => Ok(neutral_trend_strength(cfg, ctx)),
        }
    }
}

/// Ordered, short-circuiting predicate chain over a candidate entry.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<FilterKind>,
}

impl FilterChain {
    /// Build the chain in declaration order from the strategy's filter
    /// overrides. Absent or disabled blocks are skipped.
    pub fn from_config(config: &FiltersConfig) -> Self {
        let mut filters = Vec::new();
        if let Some(cfg) = config.flat_market.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::FlatMarket(cfg.clone()));
        }
        if let Some(cfg) = config.funding_rate.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::FundingRate(cfg.clone()));
        }
        if let Some(cfg) = config.btc_correlation.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::BtcCorrelation(cfg.clone()));
        }
        if let Some(cfg) = config.trend_alignment.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::TrendAlignment(cfg.clone()));
        }
        if let Some(cfg) = config.post_tp_cooldown.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::PostTpCooldown(cfg.clone()));
        }
        if let Some(cfg) = config.time_of_day.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::TimeOfDay(cfg.clone()));
        }
        if let Some(cfg) = config.volatility_regime.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::VolatilityRegime(cfg.clone()));
        }
        if let Some(cfg) = config.neutral_trend_strength.as_ref().filter(|c| c.enabled) {
            filters.push(FilterKind::NeutralTrendStrength(cfg.clone()));
        }
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the chain. A filter that errors fails open: the error goes to
    /// `diagnostics` and the chain continues.
    pub fn evaluate(
        &self,
        ctx: &FilterContext<'_>,
        diagnostics: &mut Vec<String>,
    ) -> ChainVerdict {
        for filter in &self.filters {
            match filter.evaluate(ctx) {
                Ok(verdict) => {
                    if !verdict.allowed {
                        debug!("entry blocked by {}: {:?}", filter.name(), verdict.reason);
                        return ChainVerdict {
                            allowed: false,
                            blocked_by: Some(filter.name()),
                            reason: verdict.reason,
                        };
                    }
                }
                Err(err) => {
                    debug!("filter {} failed open: {err}", filter.name());
                    diagnostics.push(format!("filter {} failed open: {err}", filter.name()));
                }
            }
        }
        ChainVerdict::allow()
    }
}

/// Kaufman-style flatness score in 0..=100: low price efficiency over the
/// lookback reads as a flat market.
pub fn flat_market_score(closes: &[f64], lookback: usize) -> Option<f64> {
    if closes.len() < lookback + 1 || lookback == 0 {
        return None;
    }
    let window = &closes[closes.len() - 1 - lookback..];
    let net = (window[window.len() - 1] - window[0]).abs();
    let path: f64 = window.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path == 0.0 {
        return Some(100.0);
    }
    Some((1.0 - net / path) * 100.0)
}

fn flat_market(cfg: &FlatMarketConfig, ctx: &FilterContext<'_>) -> FilterVerdict {
    match ctx.flat_score {
        Some(score) if score >= cfg.flat_threshold => FilterVerdict::block(format!(
            "flat market score {score:.1} >= {:.1}",
            cfg.flat_threshold
        )),
        _ => FilterVerdict::allow(),
    }
}

fn funding_rate(cfg: &FundingRateConfig, ctx: &FilterContext<'_>) -> FilterVerdict {
    let rate = match ctx.funding_rate {
        Some(rate) => rate,
        // Unknown funding is a no-op.
        None => return FilterVerdict::allow(),
    };
    match ctx.direction {
        Direction::Long if rate > cfg.block_long_above => FilterVerdict::block(format!(
            "funding {rate:.6} > {:.6} blocks LONG",
            cfg.block_long_above
        )),
        Direction::Short if rate < cfg.block_short_below => FilterVerdict::block(format!(
            "funding {rate:.6} < {:.6} blocks SHORT",
            cfg.block_short_below
        )),
        _ => FilterVerdict::allow(),
    }
}

fn btc_correlation(cfg: &BtcCorrelationConfig, ctx: &FilterContext<'_>) -> Result<FilterVerdict> {
    let benchmark = match ctx.benchmark {
        Some(series) => series,
        None => return Ok(FilterVerdict::allow()),
    };

    let needed = cfg.lookback + 1;
    if ctx.candles.len() < needed || benchmark.len() < needed {
        return Err(EngineError::Filter {
            filter: "BtcCorrelation".to_string(),
            message: format!(
                "lookback {} exceeds available candles ({}/{})",
                cfg.lookback,
                ctx.candles.len(),
                benchmark.len()
            ),
        });
    }

    let asset_window = &ctx.candles[ctx.candles.len() - needed..];
    let bench_window = &benchmark[benchmark.len() - needed..];

    let asset_closes: Vec<f64> = asset_window.iter().map(|c| c.close).collect();
    let bench_closes: Vec<f64> = bench_window.iter().map(|c| c.close).collect();
    let asset_returns = correlation::returns(&asset_closes);
    let bench_returns = correlation::returns(&bench_closes);

    let corr = match correlation::pearson(&asset_returns, &bench_returns) {
        Some(corr) => corr,
        // Degenerate series (zero variance): fail open.
        None => return Ok(FilterVerdict::allow()),
    };
    let trend = correlation::benchmark_trend(bench_window);

    if correlation::is_misaligned(ctx.direction, corr, trend, cfg.threshold) {
        let trend_str = match trend {
            BenchmarkTrend::Up => "UP",
            BenchmarkTrend::Down => "DOWN",
            BenchmarkTrend::Flat => "FLAT",
        };
        return Ok(FilterVerdict::block(format!(
            "{} misaligned with benchmark trend {trend_str} (corr {corr:.2})",
            ctx.direction
        )));
    }
    Ok(FilterVerdict::allow())
}

fn trend_alignment(ctx: &FilterContext<'_>) -> FilterVerdict {
    if ctx.trend.restricts(ctx.direction) {
        FilterVerdict::block(format!(
            "{} restricted by {} trend (strength {:.1})",
            ctx.direction, ctx.trend.bias, ctx.trend.strength
        ))
    } else {
        FilterVerdict::allow()
    }
}

fn post_tp_cooldown(cfg: &PostTpCooldownConfig, ctx: &FilterContext<'_>) -> FilterVerdict {
    let last_tp = match ctx.last_tp {
        Some(last_tp) => last_tp,
        None => return FilterVerdict::allow(),
    };
    let elapsed_ms = ctx.bar.timestamp_ms - last_tp.timestamp_ms;
    if last_tp.direction == ctx.direction && elapsed_ms <= cfg.block_duration_seconds * 1000 {
        FilterVerdict::block(format!(
            "cooldown after {} TP ({}s remaining)",
            last_tp.direction,
            cfg.block_duration_seconds - elapsed_ms / 1000
        ))
    } else {
        FilterVerdict::allow()
    }
}

fn time_of_day(cfg: &TimeOfDayConfig, ctx: &FilterContext<'_>) -> FilterVerdict {
    let hour = (ctx.bar.timestamp_ms.div_euclid(3_600_000).rem_euclid(24)) as u32;
    let blocked = if cfg.start_hour <= cfg.end_hour {
        hour >= cfg.start_hour && hour < cfg.end_hour
    } else {
        // Window wraps midnight.
        hour >= cfg.start_hour || hour < cfg.end_hour
    };
    if blocked {
        FilterVerdict::block(format!(
            "hour {hour} inside blocked window [{}, {})",
            cfg.start_hour, cfg.end_hour
        ))
    } else {
        FilterVerdict::allow()
    }
}

fn volatility_regime(cfg: &VolatilityRegimeConfig, ctx: &FilterContext<'_>) -> FilterVerdict {
    let atr_pct = match ctx.atr_percent {
        Some(atr_pct) => atr_pct,
        None => return FilterVerdict::allow(),
    };
    if atr_pct < cfg.low_atr_percent || atr_pct > cfg.high_atr_percent {
        FilterVerdict::block(format!(
            "ATR {atr_pct:.2}% outside [{:.2}%, {:.2}%]",
            cfg.low_atr_percent, cfg.high_atr_percent
        ))
    } else {
        FilterVerdict::allow()
    }
}

fn neutral_trend_strength(
    cfg: &NeutralTrendStrengthConfig,
    ctx: &FilterContext<'_>,
) -> FilterVerdict {
    if ctx.trend.bias == TrendBias::Neutral
        && ctx.trend.strength < cfg.weak_trend_threshold
        && ctx.confidence < cfg.min_confidence_for_weak_neutral
    {
        FilterVerdict::block(format!(
            "weak neutral trend (strength {:.1}) needs confidence >= {:.0}, got {:.0}",
            ctx.trend.strength, cfg.min_confidence_for_weak_neutral, ctx.confidence
        ))
    } else {
        FilterVerdict::allow()
    }
}
