use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::error::{EngineError, Result};
use crate::types::{BacktestTrade, Candle, EquityPoint, Position, TimeframeData};

use super::backtest::{BacktestEngine, FundingSeries, RunOptions, ANALYZER_WINDOW};
use super::metrics::{self, PerformanceMetrics};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_LOOKBACK_CANDLES: usize = 60;

/// How chunk state crosses boundaries. The caller chooses; the splitter
/// never decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Chunks run in strict order with exact balance and open-position
    /// carry-over; the merged equity curve is correct.
    Serial,
    /// Chunks run concurrently, each from the initial balance with no
    /// carried positions; only aggregate statistics are meaningful.
    Independent,
}

/// A contiguous slice of the series with prepended lookback context.
#[derive(Debug, Clone)]
pub struct CandleChunk {
    pub id: usize,
    pub data: TimeframeData,
    /// First body bar: entries (and, in serial mode, fills) start here;
    /// lookback bars before it are warm-up only.
    pub entry_from_ts: i64,
    pub is_first: bool,
    pub is_last: bool,
}

/// Split the primary series into `chunk_size` bodies with `lookback` bars
/// of head context on every chunk except the first. The 15m slice is
/// constrained to `[first_5m_ts - 15min, last_5m_ts]`.
pub fn split_chunks(
    data: &TimeframeData,
    chunk_size: usize,
    lookback: usize,
) -> Vec<CandleChunk> {
    let m5 = &data.m5;
    if m5.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let chunk_count = m5.len().div_ceil(chunk_size);
    let mut chunks = Vec::with_capacity(chunk_count);

    for id in 0..chunk_count {
        let body_start = id * chunk_size;
        let body_end = ((id + 1) * chunk_size).min(m5.len());
        let head_start = body_start.saturating_sub(lookback);

        let slice = &m5[head_start..body_end];
        let first_ts = slice[0].timestamp_ms;
        let last_ts = slice[slice.len() - 1].timestamp_ms;

        let mut chunk_data = TimeframeData::new(&data.symbol);
        chunk_data.m5 = slice.to_vec();
        chunk_data.m1 = slice_by_ts(&data.m1, first_ts - 15 * 60 * 1000, last_ts);
        chunk_data.m15 = slice_by_ts(&data.m15, first_ts - 15 * 60 * 1000, last_ts);
        chunk_data.benchmark = data.benchmark.as_ref().map(|benchmark| {
            let mut b = TimeframeData::new(&benchmark.symbol);
            b.m5 = slice_by_ts(&benchmark.m5, first_ts - 15 * 60 * 1000, last_ts);
            Box::new(b)
        });

        chunks.push(CandleChunk {
            id,
            data: chunk_data,
            entry_from_ts: m5[body_start].timestamp_ms,
            is_first: id == 0,
            is_last: id == chunk_count - 1,
        });
    }
    chunks
}

fn slice_by_ts(candles: &[Candle], from_ts: i64, to_ts: i64) -> Vec<Candle> {
    let start = candles.partition_point(|c| c.timestamp_ms < from_ts);
    let end = candles.partition_point(|c| c.timestamp_ms <= to_ts);
    candles[start..end].to_vec()
}

/// `min(chunk_count, max(1, cpu_count - 1))`.
pub fn recommended_workers(chunk_count: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    chunk_count.max(1).min((cpus.saturating_sub(1)).max(1))
}

/// One chunk's outcome. A failed chunk carries its error instead of results.
#[derive(Debug, Clone)]
pub struct ChunkRunResult {
    pub chunk_id: usize,
    pub entry_from_ts: i64,
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_balance: f64,
    pub open_positions: Vec<Position>,
    pub diagnostics: Vec<String>,
    pub error: Option<String>,
}

/// Merged outcome across chunks.
#[derive(Debug, Clone)]
pub struct MergedResult {
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub final_balance: f64,
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub errors: Vec<String>,
    pub valid: bool,
}

/// Runs the engine over chunks of a long series, in either execution mode.
/// Cancellation is honored at chunk boundaries; a cancelled run merges the
/// chunks that completed.
pub struct ChunkExecutor {
    config: StrategyConfig,
    pub chunk_size: usize,
    pub lookback_candles: usize,
    pub mode: ExecutionMode,
    pub workers: Option<usize>,
    pub funding: Option<FundingSeries>,
    pub max_open_positions: Option<usize>,
}

impl ChunkExecutor {
    pub fn new(config: StrategyConfig, mode: ExecutionMode) -> Self {
        Self {
            config,
            chunk_size: DEFAULT_CHUNK_SIZE,
            lookback_candles: DEFAULT_LOOKBACK_CANDLES,
            mode,
            workers: None,
            funding: None,
            max_open_positions: None,
        }
    }

    pub fn with_max_open_positions(mut self, max_open: usize) -> Self {
        self.max_open_positions = Some(max_open);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback_candles = lookback;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn run(
        &self,
        data: &TimeframeData,
        initial_balance: f64,
        cancel: Option<&AtomicBool>,
    ) -> Result<MergedResult> {
        // The lookback must cover the analyzer warm-up, otherwise body bars
        // near a boundary would be silently unwarmed.
        let warmup = BacktestEngine::new(self.config.clone())?.warmup_candles();
        let lookback = self.lookback_candles.max(warmup).max(ANALYZER_WINDOW);
        let chunks = split_chunks(data, self.chunk_size, lookback);
        if chunks.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "no primary candles for {}",
                data.symbol
            )));
        }
        let total_chunks = chunks.len();
        info!(
            "chunked run: {} chunks of {} bars (lookback {}), mode {:?}",
            total_chunks, self.chunk_size, lookback, self.mode
        );

        let results = match self.mode {
            ExecutionMode::Serial => self.run_serial(chunks, initial_balance, cancel)?,
            ExecutionMode::Independent => {
                self.run_independent(chunks, initial_balance, cancel)?
            }
        };

        merge_results(results, initial_balance, total_chunks, self.mode)
    }

    fn run_serial(
        &self,
        chunks: Vec<CandleChunk>,
        initial_balance: f64,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<ChunkRunResult>> {
        let mut results = Vec::with_capacity(chunks.len());
        let mut balance = initial_balance;
        let mut carried: Vec<Position> = Vec::new();

        for chunk in chunks {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                warn!("run cancelled before chunk {}", chunk.id);
                break;
            }

            let options = RunOptions {
                max_open_positions: self.max_open_positions,
                entry_from_ts: Some(chunk.entry_from_ts),
                // Lookback bars were already fill-checked by the previous
                // chunk; protections resume at the body.
                fills_from_ts: (!chunk.is_first).then_some(chunk.entry_from_ts),
                injected_positions: carried.clone(),
                keep_open_at_end: !chunk.is_last,
                funding: self.funding.clone(),
            };

            let result = run_chunk(&self.config, &chunk, balance, &options);
            if result.error.is_none() {
                balance = result.final_balance;
                carried = result.open_positions.clone();
            }
            results.push(result);
        }
        Ok(results)
    }

    fn run_independent(
        &self,
        chunks: Vec<CandleChunk>,
        initial_balance: f64,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<ChunkRunResult>> {
        let workers = self
            .workers
            .unwrap_or_else(|| recommended_workers(chunks.len()));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| EngineError::Chunk {
                chunk_id: 0,
                message: format!("worker pool: {e}"),
            })?;

        let config = &self.config;
        let funding = &self.funding;
        let results: Vec<ChunkRunResult> = pool.install(|| {
            chunks
                .into_par_iter()
                .map(|chunk| {
                    if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                        return ChunkRunResult {
                            chunk_id: chunk.id,
                            entry_from_ts: chunk.entry_from_ts,
                            trades: Vec::new(),
                            equity_curve: Vec::new(),
                            final_balance: initial_balance,
                            open_positions: Vec::new(),
                            diagnostics: Vec::new(),
                            error: Some("cancelled".to_string()),
                        };
                    }
                    let options = RunOptions {
                        max_open_positions: self.max_open_positions,
                        entry_from_ts: Some(chunk.entry_from_ts),
                        funding: funding.clone(),
                        ..Default::default()
                    };
                    run_chunk(config, &chunk, initial_balance, &options)
                })
                .collect()
        });
        Ok(results)
    }
}

/// Each worker owns a private engine instance with its own cache.
fn run_chunk(
    config: &StrategyConfig,
    chunk: &CandleChunk,
    starting_balance: f64,
    options: &RunOptions,
) -> ChunkRunResult {
    debug!(
        "chunk {}: {} bars from {}",
        chunk.id,
        chunk.data.m5.len(),
        chunk.entry_from_ts
    );
    let outcome = BacktestEngine::new(config.clone())
        .and_then(|mut engine| engine.run(&chunk.data, starting_balance, options));
    match outcome {
        Ok(report) => ChunkRunResult {
            chunk_id: chunk.id,
            entry_from_ts: chunk.entry_from_ts,
            trades: report.trades,
            equity_curve: report.equity_curve,
            final_balance: report.final_balance,
            open_positions: report.open_positions,
            diagnostics: report.errors,
            error: None,
        },
        Err(err) => ChunkRunResult {
            chunk_id: chunk.id,
            entry_from_ts: chunk.entry_from_ts,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            final_balance: starting_balance,
            open_positions: Vec::new(),
            diagnostics: Vec::new(),
            error: Some(err.to_string()),
        },
    }
}

/// Sort by chunk id, concatenate trades, splice equity curves (dropping
/// each chunk's lookback region and deduplicating equal timestamps), and
/// validate sequence and conservation. Chunk errors are aggregated, not
/// fatal.
pub fn merge_results(
    mut results: Vec<ChunkRunResult>,
    initial_balance: f64,
    total_chunks: usize,
    mode: ExecutionMode,
) -> Result<MergedResult> {
    results.sort_by_key(|r| r.chunk_id);

    let mut errors = Vec::new();
    for (expected, result) in results.iter().enumerate() {
        if result.chunk_id != expected {
            return Err(EngineError::Chunk {
                chunk_id: result.chunk_id,
                message: format!("non-sequential chunk ids: expected {expected}"),
            });
        }
        if let Some(err) = &result.error {
            errors.push(format!("chunk {}: {err}", result.chunk_id));
        }
    }

    let completed: Vec<&ChunkRunResult> =
        results.iter().filter(|r| r.error.is_none()).collect();
    let completed_chunks = completed.len();

    let mut trades: Vec<BacktestTrade> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::new();
    for result in &completed {
        trades.extend(result.trades.iter().cloned());
        for point in &result.equity_curve {
            // Lookback bars replay the previous chunk's tail; drop them.
            if point.timestamp < result.entry_from_ts {
                continue;
            }
            match equity_curve.last() {
                Some(last) if last.timestamp == point.timestamp => {
                    *equity_curve.last_mut().unwrap() = *point;
                }
                Some(last) if last.timestamp > point.timestamp => {
                    return Err(EngineError::Chunk {
                        chunk_id: result.chunk_id,
                        message: format!(
                            "equity regression: {} after {}",
                            point.timestamp, last.timestamp
                        ),
                    });
                }
                _ => equity_curve.push(*point),
            }
        }
    }

    let realized: f64 = trades.iter().map(|t| t.realized_pnl).sum();
    let final_balance = match mode {
        ExecutionMode::Serial => completed
            .last()
            .map(|r| r.final_balance)
            .unwrap_or(initial_balance),
        ExecutionMode::Independent => initial_balance + realized,
    };

    // In serial mode every realization is booked exactly once, so the
    // terminal balance must reconcile with the merged trade log (open
    // positions at the end only exist if the last chunk failed).
    if mode == ExecutionMode::Serial && errors.is_empty() {
        let open_realized: f64 = completed
            .last()
            .map(|r| r.open_positions.iter().map(|p| p.realized_pnl).sum())
            .unwrap_or(0.0);
        let expected = initial_balance + realized + open_realized;
        if (final_balance - expected).abs() > 1e-8 * initial_balance.abs().max(1.0) {
            return Err(EngineError::Chunk {
                chunk_id: completed.last().map(|r| r.chunk_id).unwrap_or(0),
                message: format!(
                    "conservation: final {final_balance} != initial + realized {expected}"
                ),
            });
        }
    }

    let mut diagnostics: Vec<String> = completed
        .iter()
        .flat_map(|r| r.diagnostics.iter().cloned())
        .collect();
    diagnostics.extend(errors.iter().cloned());

    // Serial curves are genuine per-bar balance paths; independent chunks
    // each restart from the initial balance, so their spliced curve has
    // artificial resets and the trade-reconstructed curve is used instead.
    let metrics = match mode {
        ExecutionMode::Serial => metrics::calculate(&trades, &equity_curve),
        ExecutionMode::Independent => {
            let reconstructed = metrics::equity_from_trades(&trades, initial_balance);
            metrics::calculate(&trades, &reconstructed)
        }
    };

    Ok(MergedResult {
        metrics,
        trades,
        equity_curve,
        final_balance,
        completed_chunks,
        total_chunks,
        valid: errors.is_empty() && completed_chunks == total_chunks,
        errors: diagnostics,
    })
}
