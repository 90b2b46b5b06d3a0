use tracing::{debug, info};

use crate::analyzers::{AnalyzerContext, AnalyzerSet};
use crate::config::StrategyConfig;
use crate::error::{EngineError, Result};
use crate::filters::{flat_market_score, FilterChain, FilterContext, LastTakeProfit};
use crate::indicators::{atr_percent, IndicatorCache, IndicatorKind};
use crate::risk;
use crate::signal::aggregate;
use crate::types::{
    AccountState, BacktestTrade, Candle, Direction, EquityPoint, ExitReason, Position,
    TimeframeData, Timeframe, TrendAnalysis, TrendBias,
};

use super::metrics::{self, PerformanceMetrics};
use super::orchestrator::{self, EntryDecision, EntryGate};

/// Longest primary-timeframe window handed to analyzers. Matches the
/// default chunk lookback so a chunked run sees the same windows a
/// single-threaded run does.
pub(crate) const ANALYZER_WINDOW: usize = 60;
/// 15m candles in the trend snapshot.
const TREND_LOOKBACK: usize = 60;
/// Bias band for the trend snapshot, percent.
const TREND_BAND_PCT: f64 = 0.2;
/// Sizing ATR floor as a fraction of the close.
const ATR_FLOOR_FRACTION: f64 = 0.002;
/// Conservation tolerance, relative to the initial balance.
const CONSERVATION_TOLERANCE: f64 = 1e-8;

/// Known funding rates as `(timestamp_ms, rate)`, ascending. The funding
/// filter reads the most recent rate at or before the bar.
pub type FundingSeries = Vec<(i64, f64)>;

/// Per-run knobs beyond the strategy document. The chunk executor uses the
/// timestamp gates and position injection; plain runs keep the defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the strategy's `maxOpenPositions` when set.
    pub max_open_positions: Option<usize>,
    /// Entries are suppressed on bars before this timestamp (chunk lookback
    /// bars are warm-up only).
    pub entry_from_ts: Option<i64>,
    /// Intra-bar fills are suppressed on bars before this timestamp; used
    /// when injected positions were already protected by a previous chunk.
    pub fills_from_ts: Option<i64>,
    /// Open positions carried in from a previous chunk.
    pub injected_positions: Vec<Position>,
    /// Leave positions open at the end instead of closing them at the last
    /// bar; their terminal state is reported for the next chunk.
    pub keep_open_at_end: bool,
    pub funding: Option<FundingSeries>,
}

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub final_balance: f64,
    /// Terminal open positions; empty unless `keep_open_at_end` was set.
    pub open_positions: Vec<Position>,
    /// Non-fatal diagnostics: skipped analyzers, failed-open filters.
    pub errors: Vec<String>,
}

/// Deterministic candle-stepping simulator. Single-threaded and fully
/// synchronous; one instance per chunk worker, each with a private
/// indicator cache.
pub struct BacktestEngine {
    config: StrategyConfig,
    analyzers: AnalyzerSet,
    chain: FilterChain,
    cache: IndicatorCache,
    warmup: usize,
}

impl BacktestEngine {
    pub fn new(config: StrategyConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| EngineError::Config(errors.join("; ")))?;
        let analyzers = AnalyzerSet::from_config(&config.analyzers, config.analyzer_failure)?;
        let chain = FilterChain::from_config(&config.filters);
        let warmup = analyzers.warmup_candles(&config.indicators);
        Ok(Self {
            config,
            analyzers,
            chain,
            cache: IndicatorCache::new(),
            warmup,
        })
    }

    /// Bars before this count are warm-up: no signals, no entries.
    pub fn warmup_candles(&self) -> usize {
        self.warmup
    }

    /// Run the per-bar main loop over the primary series.
    pub fn run(
        &mut self,
        data: &TimeframeData,
        initial_balance: f64,
        options: &RunOptions,
    ) -> Result<BacktestReport> {
        if data.m5.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "no primary candles for {}",
                data.symbol
            )));
        }
        if data.m5.len() < self.warmup {
            return Err(EngineError::InsufficientData(format!(
                "{} primary candles < warm-up requirement {}",
                data.m5.len(),
                self.warmup
            )));
        }

        let max_open = options
            .max_open_positions
            .unwrap_or(self.config.risk_management.max_open_positions);

        let mut account = AccountState {
            balance: initial_balance,
            open_positions: options.injected_positions.clone(),
        };
        let injected_realized: f64 = account
            .open_positions
            .iter()
            .map(|p| p.realized_pnl)
            .sum();
        let mut trades: Vec<BacktestTrade> = Vec::new();
        let mut equity_curve = Vec::with_capacity(data.m5.len());
        let mut errors = Vec::new();
        let mut last_tp: Option<LastTakeProfit> = None;

        info!(
            "backtest {}: {} primary bars, warm-up {}, balance {:.2}",
            data.symbol,
            data.m5.len(),
            self.warmup,
            initial_balance
        );

        for (i, bar) in data.m5.iter().enumerate() {
            // Indicator values are bar-local.
            self.cache.clear();

            let fills_allowed = options
                .fills_from_ts
                .map_or(true, |ts| bar.timestamp_ms >= ts);
            let mut realized_this_bar = false;
            if fills_allowed && !account.open_positions.is_empty() {
                realized_this_bar = process_fills(
                    &mut account.open_positions,
                    bar,
                    &mut account.balance,
                    &mut trades,
                    &mut last_tp,
                )?;
            }

            let warm = i + 1 >= self.warmup;
            let entries_allowed = options
                .entry_from_ts
                .map_or(true, |ts| bar.timestamp_ms >= ts);
            // Churn guard: a bar that just realized a fill takes no new
            // entry.
            if warm
                && entries_allowed
                && !realized_this_bar
                && account.open_positions.len() < max_open
            {
                let balance = account.balance;
                self.evaluate_entry(
                    data,
                    i,
                    bar,
                    balance,
                    &mut account.open_positions,
                    last_tp,
                    options,
                    &mut errors,
                )?;
            }

            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp_ms,
                balance: account.balance,
            });
        }

        if !options.keep_open_at_end && !account.open_positions.is_empty() {
            let last_bar = data.m5[data.m5.len() - 1];
            debug!(
                "closing {} remaining positions at end of backtest",
                account.open_positions.len()
            );
            for mut position in account.open_positions.drain(..) {
                let pnl = position.pnl_at(last_bar.close, position.remaining_size);
                account.balance += pnl;
                position.realized_pnl += pnl;
                trades.push(fold_trade(
                    position,
                    last_bar.close,
                    last_bar.timestamp_ms,
                    ExitReason::EndOfBacktest,
                ));
            }
            if let Some(last) = equity_curve.last_mut() {
                last.balance = account.balance;
            }
        }

        // Cash conservation: the final balance must equal the initial
        // balance plus every realized PnL booked during the run.
        let realized: f64 = trades.iter().map(|t| t.realized_pnl).sum::<f64>()
            + account
                .open_positions
                .iter()
                .map(|p| p.realized_pnl)
                .sum::<f64>()
            - injected_realized;
        let expected = initial_balance + realized;
        if (account.balance - expected).abs()
            > CONSERVATION_TOLERANCE * initial_balance.abs().max(1.0)
        {
            return Err(EngineError::InvariantViolation {
                rule: "cash-conservation",
                timestamp_ms: data.m5[data.m5.len() - 1].timestamp_ms,
                detail: format!(
                    "balance {} != initial + realized {expected}",
                    account.balance
                ),
            });
        }

        let metrics = metrics::calculate(&trades, &equity_curve);
        debug!("indicator cache hit rate {:.1}%", self.cache.hit_rate() * 100.0);
        info!(
            "backtest {} complete: {} trades, final balance {:.2}",
            data.symbol,
            trades.len(),
            account.balance
        );

        Ok(BacktestReport {
            trades,
            equity_curve,
            metrics,
            final_balance: account.balance,
            open_positions: account.open_positions,
            errors,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_entry(
        &mut self,
        data: &TimeframeData,
        index: usize,
        bar: &Candle,
        balance: f64,
        open_positions: &mut Vec<Position>,
        last_tp: Option<LastTakeProfit>,
        options: &RunOptions,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let start = (index + 1).saturating_sub(ANALYZER_WINDOW);
        let window = &data.m5[start..=index];
        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = window.iter().map(|c| c.volume).collect();

        let signals = {
            let mut ctx = AnalyzerContext {
                candles: window,
                closes: &closes,
                volumes: &volumes,
                indicators: &self.config.indicators,
                cache: &mut self.cache,
            };
            self.analyzers.collect(&mut ctx, errors)?
        };
        if signals.is_empty() {
            return Ok(());
        }

        let aggregated = aggregate(&signals, &self.config.aggregator);
        let direction = match aggregated.direction {
            Some(direction) if aggregated.recommended_entry => direction,
            _ => return Ok(()),
        };

        let trend = compute_trend(
            data.m15_window_at(bar.timestamp_ms, TREND_LOOKBACK),
            &self.config,
        );

        let flat_config = self.config.filters.flat_market.as_ref();
        let flat_score =
            flat_config.and_then(|cfg| flat_market_score(&closes, cfg.lookback));
        // Soft flat zone: at half the blocking threshold the stricter
        // flat-market entry threshold applies.
        let market_is_flat = match (flat_config, flat_score) {
            (Some(cfg), Some(score)) => score >= cfg.flat_threshold / 2.0,
            _ => false,
        };

        let atr_pct = self.cache.get_or_compute(
            (
                IndicatorKind::Atr,
                self.config.indicators.atr_period as u32,
                Timeframe::PRIMARY,
            ),
            || atr_percent(window, self.config.indicators.atr_period),
        );

        let benchmark_window = data.benchmark.as_ref().map(|benchmark| {
            let end = benchmark
                .m5
                .partition_point(|c| c.timestamp_ms <= bar.timestamp_ms);
            &benchmark.m5[..end]
        });

        let funding_rate = options.funding.as_ref().and_then(|series| {
            let idx = series.partition_point(|(ts, _)| *ts <= bar.timestamp_ms);
            (idx > 0).then(|| series[idx - 1].1)
        });

        let filter_ctx = FilterContext {
            direction,
            confidence: aggregated.confidence,
            bar,
            candles: window,
            benchmark: benchmark_window,
            funding_rate,
            trend: &trend,
            last_tp,
            atr_percent: atr_pct,
            flat_score,
        };
        let gate = EntryGate {
            entry_threshold: self.config.entry_threshold,
            flat_entry_threshold: flat_config.and_then(|cfg| cfg.entry_threshold),
            market_is_flat,
        };

        match orchestrator::decide(
            direction,
            &aggregated,
            &trend,
            &gate,
            &self.chain,
            &filter_ctx,
            errors,
        ) {
            EntryDecision::Enter => {
                let atr_sizing = (bar.high - bar.low).max(ATR_FLOOR_FRACTION * bar.close);
                let atr_sizing_pct = atr_sizing / bar.close * 100.0;
                let levels = risk::plan_levels(
                    direction,
                    bar.close,
                    atr_sizing_pct,
                    &self.config.risk_management,
                )?;
                let size = risk::position_size(
                    balance,
                    bar.close,
                    levels.stop_loss,
                    &self.config.risk_management,
                );
                if size > 0.0 {
                    debug!(
                        "[{}] open {direction} {size:.6} @ {:.4} (stop {:.4}, confidence {:.1})",
                        data.symbol, bar.close, levels.stop_loss, aggregated.confidence
                    );
                    open_positions.push(risk::build_position(
                        bar.timestamp_ms,
                        bar.close,
                        direction,
                        size,
                        &levels,
                        &self.config.risk_management,
                    ));
                }
            }
            EntryDecision::Skip { reason, blocked_by } => {
                debug!(
                    "[{}] skip {direction} at {}: {reason} (blocked_by {:?})",
                    data.symbol, bar.timestamp_ms, blocked_by
                );
            }
        }
        Ok(())
    }
}

/// Intra-bar fill pass for one bar: take-profits in ascending level order
/// first, then the stop on the remainder. When both sides of a bar's range
/// would trigger, the take-profit is assumed to fill first; tests pin this
/// convention. Returns whether any fill was realized.
fn process_fills(
    positions: &mut Vec<Position>,
    bar: &Candle,
    balance: &mut f64,
    trades: &mut Vec<BacktestTrade>,
    last_tp: &mut Option<LastTakeProfit>,
) -> Result<bool> {
    let mut realized_any = false;
    let mut still_open = Vec::with_capacity(positions.len());

    for mut position in positions.drain(..) {
        for idx in 0..position.take_profits.len() {
            if position.take_profits[idx].hit {
                continue;
            }
            let tp = position.take_profits[idx];
            if !position.is_tp_hit(&tp, bar.high, bar.low) {
                continue;
            }
            let pnl = position.pnl_at(tp.price, tp.size_share);
            *balance += pnl;
            position.realized_pnl += pnl;
            position.remaining_size -= tp.size_share;
            position.take_profits[idx].hit = true;
            realized_any = true;
            *last_tp = Some(LastTakeProfit {
                timestamp_ms: bar.timestamp_ms,
                direction: position.direction,
            });
            debug!(
                "TP{} filled at {:.4} for {:.6} units (pnl {pnl:.4})",
                tp.level_index + 1,
                tp.price,
                tp.size_share
            );
            // The second realized level arms the trailing stop at
            // break-even.
            if tp.level_index == 1 {
                position.trailing_active = true;
                position.stop_loss = match position.direction {
                    Direction::Long => position.stop_loss.max(position.entry_price),
                    Direction::Short => position.stop_loss.min(position.entry_price),
                };
            }
        }

        if position.take_profits.iter().all(|tp| tp.hit) {
            position.remaining_size = 0.0;
            let exit_price = position
                .take_profits
                .last()
                .map(|tp| tp.price)
                .unwrap_or(bar.close);
            trades.push(fold_trade(
                position,
                exit_price,
                bar.timestamp_ms,
                ExitReason::TakeProfit,
            ));
            continue;
        }

        let hit_shares: f64 = position
            .take_profits
            .iter()
            .filter(|tp| tp.hit)
            .map(|tp| tp.size_share)
            .sum();
        let drift =
            (hit_shares + position.remaining_size - position.size_initial).abs();
        if drift > CONSERVATION_TOLERANCE * position.size_initial.max(1.0) {
            return Err(EngineError::InvariantViolation {
                rule: "tp-share-conservation",
                timestamp_ms: bar.timestamp_ms,
                detail: format!(
                    "hit {hit_shares} + remaining {} != initial {}",
                    position.remaining_size, position.size_initial
                ),
            });
        }

        if position.remaining_size > 0.0 && position.is_stop_hit(bar.high, bar.low) {
            let reason = if position.trailing_active {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            let stop = position.stop_loss;
            let pnl = position.pnl_at(stop, position.remaining_size);
            *balance += pnl;
            position.realized_pnl += pnl;
            realized_any = true;
            debug!(
                "stop filled at {:.4} for {:.6} units (pnl {pnl:.4})",
                stop, position.remaining_size
            );
            trades.push(fold_trade(position, stop, bar.timestamp_ms, reason));
            continue;
        }

        // Ratchet the trailing stop toward this bar's close; it can only
        // take effect from the next bar.
        if position.trailing_active {
            position.stop_loss = match position.direction {
                Direction::Long => position
                    .stop_loss
                    .max(bar.close - position.stop_distance),
                Direction::Short => position
                    .stop_loss
                    .min(bar.close + position.stop_distance),
            };
        }

        still_open.push(position);
    }

    *positions = still_open;
    Ok(realized_any)
}

/// Fold a fully closed position into the immutable trade log.
fn fold_trade(
    position: Position,
    exit_price: f64,
    exit_time: i64,
    exit_reason: ExitReason,
) -> BacktestTrade {
    let notional = position.entry_price * position.size_initial;
    let realized_pnl_percent = if notional == 0.0 {
        0.0
    } else {
        position.realized_pnl / notional * 100.0
    };
    BacktestTrade {
        entry_time: position.entry_time,
        entry_price: position.entry_price,
        direction: position.direction,
        size: position.size_initial,
        stop_loss: position.stop_loss,
        take_profits: position.take_profits,
        exit_time,
        exit_price,
        exit_reason,
        realized_pnl: position.realized_pnl,
        realized_pnl_percent,
        duration_ms: exit_time - position.entry_time,
    }
}

/// Trend snapshot over the trailing 15m window: bias from the net move
/// against a +/-0.2% band, strength as the absolute move capped at 100.
/// Strong trends restrict the counter-trend direction when the
/// trend-alignment filter is configured.
pub fn compute_trend(window: &[Candle], config: &StrategyConfig) -> TrendAnalysis {
    if window.len() < 2 {
        return TrendAnalysis::neutral();
    }
    let first = window[0].close;
    let last = window[window.len() - 1].close;
    if first == 0.0 {
        return TrendAnalysis::neutral();
    }
    let pct = (last - first) / first * 100.0;
    let bias = if pct > TREND_BAND_PCT {
        TrendBias::Bullish
    } else if pct < -TREND_BAND_PCT {
        TrendBias::Bearish
    } else {
        TrendBias::Neutral
    };
    let strength = pct.abs().min(100.0);

    let mut restricted_directions = Vec::new();
    if let Some(cfg) = config
        .filters
        .trend_alignment
        .as_ref()
        .filter(|c| c.enabled)
    {
        if strength >= cfg.min_strength_to_restrict {
            match bias {
                TrendBias::Bullish => restricted_directions.push(Direction::Short),
                TrendBias::Bearish => restricted_directions.push(Direction::Long),
                TrendBias::Neutral => {}
            }
        }
    }

    TrendAnalysis {
        bias,
        strength,
        restricted_directions,
    }
}
