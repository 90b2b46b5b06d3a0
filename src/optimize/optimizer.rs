use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::StrategyConfig;
use crate::engine::{ChunkExecutor, ExecutionMode, PerformanceMetrics};
use crate::error::{EngineError, Result};
use crate::types::TimeframeData;

use super::grid::{apply_combination, combination_key, Combination, ParameterGrid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMethod {
    #[default]
    Grid,
    Random,
}

impl FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "grid" => Ok(SearchMethod::Grid),
            "random" => Ok(SearchMethod::Random),
            other => Err(format!("unknown search method: {other}")),
        }
    }
}

/// Metric the ranking sorts on, descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankingMetric {
    #[default]
    Sharpe,
    ProfitFactor,
    WinRate,
}

impl RankingMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMetric::Sharpe => "sharpe",
            RankingMetric::ProfitFactor => "profitFactor",
            RankingMetric::WinRate => "winRate",
        }
    }

    pub fn value(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            RankingMetric::Sharpe => metrics.sharpe_ratio,
            RankingMetric::ProfitFactor => metrics.profit_factor,
            RankingMetric::WinRate => metrics.win_rate,
        }
    }
}

impl FromStr for RankingMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sharpe" => Ok(RankingMetric::Sharpe),
            "profitFactor" => Ok(RankingMetric::ProfitFactor),
            "winRate" => Ok(RankingMetric::WinRate),
            other => Err(format!("unknown ranking metric: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub method: SearchMethod,
    pub metric: RankingMetric,
    /// Cap for random search; grids smaller than this run in full.
    pub max_combinations: usize,
    pub workers: Option<usize>,
    /// Seed for random sampling; fixed so runs reproduce.
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            method: SearchMethod::Grid,
            metric: RankingMetric::Sharpe,
            max_combinations: 100,
            workers: None,
            seed: 42,
        }
    }
}

/// One evaluated combination in the ranked output.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationEntry {
    pub params: Combination,
    pub metrics: PerformanceMetrics,
    /// Value of the ranking metric.
    pub score: f64,
    /// Diagnostic blend of win rate, profit factor, Sharpe and trade count;
    /// never used for ranking unless selected explicitly.
    pub composite_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizerEfficiency {
    pub total_combinations: usize,
    pub tested: usize,
    pub cache_savings: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub best_params: Combination,
    pub best_metrics: PerformanceMetrics,
    pub results: Vec<OptimizationEntry>,
    pub efficiency: OptimizerEfficiency,
}

/// Diagnostic composite: `0.40*winRate + 0.35*min(pf/5,1) +
/// 0.15*clamp(sharpe/3,0,1) + 0.10*min(trades/50,1)`.
pub fn composite_score(metrics: &PerformanceMetrics) -> f64 {
    0.40 * metrics.win_rate
        + 0.35 * (metrics.profit_factor / 5.0).min(1.0)
        + 0.15 * (metrics.sharpe_ratio / 3.0).clamp(0.0, 1.0)
        + 0.10 * (metrics.total_trades as f64 / 50.0).min(1.0)
}

/// Grid / random search over a parameter grid with a per-instance result
/// cache keyed by the canonical combination serialization. The cache is not
/// thread-safe and belongs to this optimizer instance alone.
pub struct ParameterOptimizer {
    base: StrategyConfig,
    grid: ParameterGrid,
    config: OptimizerConfig,
    cache: HashMap<String, PerformanceMetrics>,
}

impl ParameterOptimizer {
    pub fn new(base: StrategyConfig, grid: ParameterGrid, config: OptimizerConfig) -> Self {
        Self {
            base,
            grid,
            config,
            cache: HashMap::new(),
        }
    }

    pub fn run(
        &mut self,
        data: &TimeframeData,
        initial_balance: f64,
    ) -> Result<OptimizationReport> {
        let started = Instant::now();
        let combinations = self.select_combinations()?;
        let total_combinations = combinations.len();
        info!(
            "optimizer: {total_combinations} combinations ({:?}, ranked by {})",
            self.config.method,
            self.config.metric.as_str()
        );

        // Resolve each combination to a validated strategy up front;
        // invalid layouts are skipped and counted.
        let base_value = serde_json::to_value(&self.base)?;
        let mut skipped_invalid = 0usize;
        let mut pending: Vec<(String, Combination, StrategyConfig)> = Vec::new();
        let mut cached: Vec<(String, Combination)> = Vec::new();

        for combination in combinations {
            let key = combination_key(&combination);
            if self.cache.contains_key(&key) {
                cached.push((key, combination));
                continue;
            }
            let document = match apply_combination(&base_value, &combination) {
                Ok(document) => document,
                Err(err) => {
                    debug!("combination skipped: {err}");
                    skipped_invalid += 1;
                    continue;
                }
            };
            let strategy: StrategyConfig = match serde_json::from_value(document) {
                Ok(strategy) => strategy,
                Err(err) => {
                    debug!("combination skipped: {err}");
                    skipped_invalid += 1;
                    continue;
                }
            };
            if let Err(errors) = strategy.validate() {
                debug!("combination skipped: {}", errors.join("; "));
                skipped_invalid += 1;
                continue;
            }
            pending.push((key, combination, strategy));
        }

        let cache_savings = cached.len();
        let tested = pending.len();

        // Independent combinations fan out over a worker pool; each runs
        // its own chunked backtest.
        let workers = self
            .config
            .workers
            .unwrap_or_else(|| crate::engine::recommended_workers(tested.max(1)));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| EngineError::Config(format!("worker pool: {e}")))?;

        let evaluated: Vec<(String, Combination, Option<PerformanceMetrics>)> =
            pool.install(|| {
                pending
                    .into_par_iter()
                    .map(|(key, combination, strategy)| {
                        let executor =
                            ChunkExecutor::new(strategy, ExecutionMode::Independent)
                                .with_workers(1);
                        match executor.run(data, initial_balance, None) {
                            Ok(merged) if merged.valid => {
                                (key, combination, Some(merged.metrics))
                            }
                            Ok(merged) => {
                                debug!(
                                    "combination discarded: {} chunk errors",
                                    merged.errors.len()
                                );
                                (key, combination, None)
                            }
                            Err(err) => {
                                debug!("combination discarded: {err}");
                                (key, combination, None)
                            }
                        }
                    })
                    .collect()
            });

        let mut failed = 0usize;
        let mut results: Vec<OptimizationEntry> = Vec::new();
        for (key, combination, outcome) in evaluated {
            match outcome {
                Some(metrics) => {
                    self.cache.insert(key, metrics.clone());
                    results.push(self.entry(combination, metrics));
                }
                None => failed += 1,
            }
        }
        for (key, combination) in cached {
            let metrics = self.cache[&key].clone();
            results.push(self.entry(combination, metrics));
        }

        // Rank by the selected metric, descending; ties resolve on the
        // canonical key so ordering is stable.
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| combination_key(&a.params).cmp(&combination_key(&b.params)))
        });

        let best = results.first().ok_or_else(|| {
            EngineError::Config("optimizer produced no valid combinations".to_string())
        })?;

        Ok(OptimizationReport {
            best_params: best.params.clone(),
            best_metrics: best.metrics.clone(),
            efficiency: OptimizerEfficiency {
                total_combinations,
                tested,
                cache_savings,
                skipped_invalid,
                failed,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            results,
        })
    }

    fn entry(&self, params: Combination, metrics: PerformanceMetrics) -> OptimizationEntry {
        let score = self.config.metric.value(&metrics);
        let composite = composite_score(&metrics);
        OptimizationEntry {
            params,
            metrics,
            score,
            composite_score: composite,
        }
    }

    fn select_combinations(&self) -> Result<Vec<Combination>> {
        if self.grid.is_empty() {
            return Err(EngineError::Config("parameter grid is empty".to_string()));
        }
        let all = self.grid.combinations();
        match self.config.method {
            SearchMethod::Grid => Ok(all),
            SearchMethod::Random => {
                if all.len() <= self.config.max_combinations {
                    return Ok(all);
                }
                // Uniform sample without replacement, seeded for
                // reproducibility.
                let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
                let mut picked: Vec<Combination> =
                    rand::seq::index::sample(&mut rng, all.len(), self.config.max_combinations)
                        .into_iter()
                        .map(|i| all[i].clone())
                        .collect();
                picked.sort_by_key(combination_key);
                Ok(picked)
            }
        }
    }
}
