use serde::Serialize;
use tracing::info;

use crate::config::StrategyConfig;
use crate::engine::{BacktestEngine, PerformanceMetrics, RunOptions};
use crate::error::{EngineError, Result};
use crate::types::TimeframeData;

use super::grid::{apply_combination, Combination, ParameterGrid};
use super::optimizer::{OptimizerConfig, ParameterOptimizer, RankingMetric};

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone)]
pub struct WalkForwardConfig {
    pub in_sample_days: i64,
    pub out_of_sample_days: i64,
    pub metric: RankingMetric,
    /// Performance-gap threshold above which a window is flagged
    /// overfitted.
    pub detection_threshold: f64,
    pub optimizer: OptimizerConfig,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            in_sample_days: 30,
            out_of_sample_days: 10,
            metric: RankingMetric::Sharpe,
            detection_threshold: 0.3,
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// One rolling window: optimize in-sample, validate out-of-sample.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub window: usize,
    pub is_start_ts: i64,
    pub is_end_ts: i64,
    pub oos_start_ts: i64,
    pub oos_end_ts: i64,
    pub optimal_params: Combination,
    pub is_metrics: PerformanceMetrics,
    pub oos_metrics: PerformanceMetrics,
    pub is_metric_value: f64,
    pub oos_metric_value: f64,
    pub performance_gap: f64,
    pub overfitting_score: f64,
    pub overfitted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardReport {
    pub windows: Vec<WindowReport>,
    pub total_windows: usize,
    pub overfitted_windows: usize,
    pub overfitting_rate: f64,
    pub avg_overfitting_score: f64,
}

/// Degradation from in-sample to out-of-sample for the selected metric:
/// `gap = 1 - OOS/IS`, with the score clamped to `[0, 1]`. A non-positive
/// in-sample value yields no gap (there is nothing to degrade from).
pub fn detect_overfitting(
    is_value: f64,
    oos_value: f64,
    threshold: f64,
) -> (f64, f64, bool) {
    if is_value <= 0.0 {
        return (0.0, 0.0, false);
    }
    let gap = 1.0 - oos_value / is_value;
    let score = gap.clamp(0.0, 1.0);
    (gap, score, gap > threshold)
}

/// Rolling in-sample/out-of-sample analysis. Consecutive windows slide by
/// the out-of-sample length, so OOS segments never overlap.
pub fn run_walk_forward(
    base: &StrategyConfig,
    grid: &ParameterGrid,
    data: &TimeframeData,
    initial_balance: f64,
    config: &WalkForwardConfig,
) -> Result<WalkForwardReport> {
    if config.in_sample_days <= 0 || config.out_of_sample_days <= 0 {
        return Err(EngineError::Config(
            "walk-forward window lengths must be positive".to_string(),
        ));
    }
    let first_ts = data
        .m5
        .first()
        .map(|c| c.timestamp_ms)
        .ok_or_else(|| EngineError::InsufficientData("no primary candles".to_string()))?;
    let last_ts = data.m5[data.m5.len() - 1].timestamp_ms;

    let is_ms = config.in_sample_days * DAY_MS;
    let oos_ms = config.out_of_sample_days * DAY_MS;

    let mut windows = Vec::new();
    let mut window_index = 0usize;
    loop {
        let is_start = first_ts + window_index as i64 * oos_ms;
        let is_end = is_start + is_ms;
        let oos_end = is_end + oos_ms;
        // The last primary bar covers its full duration.
        if oos_end > last_ts + crate::types::Timeframe::PRIMARY.duration_ms() {
            break;
        }

        info!(
            "walk-forward window {window_index}: IS [{is_start}, {is_end}), OOS [{is_end}, {oos_end})"
        );

        let is_data = data.slice(is_start, is_end - 1);
        let oos_data = data.slice(is_end, oos_end - 1);

        let mut optimizer = ParameterOptimizer::new(
            base.clone(),
            grid.clone(),
            OptimizerConfig {
                metric: config.metric,
                ..config.optimizer.clone()
            },
        );
        let optimization = optimizer.run(&is_data, initial_balance)?;

        // One backtest on unseen data with the in-sample winner.
        let base_value = serde_json::to_value(base)?;
        let tuned_value = apply_combination(&base_value, &optimization.best_params)?;
        let tuned: StrategyConfig = serde_json::from_value(tuned_value)
            .map_err(|e| EngineError::Config(format!("optimal params: {e}")))?;
        let mut engine = BacktestEngine::new(tuned)?;
        let oos_report = engine.run(&oos_data, initial_balance, &RunOptions::default())?;

        let is_value = config.metric.value(&optimization.best_metrics);
        let oos_value = config.metric.value(&oos_report.metrics);
        let (performance_gap, overfitting_score, overfitted) =
            detect_overfitting(is_value, oos_value, config.detection_threshold);

        windows.push(WindowReport {
            window: window_index,
            is_start_ts: is_start,
            is_end_ts: is_end,
            oos_start_ts: is_end,
            oos_end_ts: oos_end,
            optimal_params: optimization.best_params,
            is_metrics: optimization.best_metrics,
            oos_metrics: oos_report.metrics,
            is_metric_value: is_value,
            oos_metric_value: oos_value,
            performance_gap,
            overfitting_score,
            overfitted,
        });
        window_index += 1;
    }

    if windows.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "series too short for {}d in-sample + {}d out-of-sample",
            config.in_sample_days, config.out_of_sample_days
        )));
    }

    let total_windows = windows.len();
    let overfitted_windows = windows.iter().filter(|w| w.overfitted).count();
    let avg_overfitting_score =
        windows.iter().map(|w| w.overfitting_score).sum::<f64>() / total_windows as f64;

    Ok(WalkForwardReport {
        total_windows,
        overfitted_windows,
        overfitting_rate: overfitted_windows as f64 / total_windows as f64,
        avg_overfitting_score,
        windows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    #[test]
    fn overfitting_flagged_by_threshold() {
        // IS sharpe 2.0 vs OOS 0.5: gap 0.75.
        let (gap, score, flagged) = detect_overfitting(2.0, 0.5, 0.3);
        assert!((gap - 0.75).abs() < 1e-12);
        assert!((score - 0.75).abs() < 1e-12);
        assert!(flagged);

        // A lenient threshold does not flag the same window.
        let (_, _, flagged) = detect_overfitting(2.0, 0.5, 0.8);
        assert!(!flagged);
    }

    #[test]
    fn overfitting_score_clamped() {
        // OOS worse than zero: gap above 1 clamps.
        let (gap, score, flagged) = detect_overfitting(1.0, -2.0, 0.3);
        assert!(gap > 1.0);
        assert_eq!(score, 1.0);
        assert!(flagged);

        // OOS better than IS: negative gap clamps to zero.
        let (gap, score, flagged) = detect_overfitting(1.0, 2.0, 0.3);
        assert!(gap < 0.0);
        assert_eq!(score, 0.0);
        assert!(!flagged);
    }

    #[test]
    fn non_positive_in_sample_never_flags() {
        let (gap, score, flagged) = detect_overfitting(0.0, 1.0, 0.3);
        assert_eq!((gap, score), (0.0, 0.0));
        assert!(!flagged);
        let (_, _, flagged) = detect_overfitting(-1.0, 1.0, 0.3);
        assert!(!flagged);
    }

    fn strategy() -> StrategyConfig {
        StrategyConfig::from_json(
            r#"{
                "metadata": {"name": "wf-test", "version": "1"},
                "indicators": {"rsiPeriod": 1, "rsiOversold": 99.0, "rsiOverbought": 100.0},
                "analyzers": [{"name": "rsi_momentum", "weight": 1.0}],
                "entryThreshold": 50,
                "aggregator": {"minTotalScore": 0.0},
                "riskManagement": {
                    "stopLoss": {"atrMultiplier": 1.0, "minDistancePercent": 5.0},
                    "takeProfits": [{"pricePercent": 5.0, "sizePercent": 100.0}]
                }
            }"#,
        )
        .unwrap()
    }

    /// Three days of 5m bars with periodic take-profit spikes.
    fn market_data(days: i64) -> TimeframeData {
        let mut data = TimeframeData::new("TEST");
        let bars = days * 288;
        data.m5 = (0..bars)
            .map(|i| {
                let spike = i % 2 == 1;
                Candle {
                    timestamp_ms: i * 300_000,
                    open: 100.0,
                    high: if spike { 106.0 } else { 100.0 },
                    low: 100.0,
                    close: 100.0,
                    volume: 100.0,
                }
            })
            .collect();
        data
    }

    #[test]
    fn windows_slide_by_oos_days() {
        let data = market_data(5);
        let grid = ParameterGrid::from_json(r#"{"entryThreshold": [40, 60]}"#).unwrap();
        let config = WalkForwardConfig {
            in_sample_days: 2,
            out_of_sample_days: 1,
            optimizer: OptimizerConfig {
                workers: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };

        let report = run_walk_forward(&strategy(), &grid, &data, 10_000.0, &config).unwrap();
        // 5 days: windows starting at day 0, 1, 2 fit a 2d+1d pair.
        assert_eq!(report.total_windows, 3);
        for (i, window) in report.windows.iter().enumerate() {
            assert_eq!(window.is_start_ts, i as i64 * DAY_MS);
            assert_eq!(window.oos_start_ts, window.is_end_ts);
            assert_eq!(window.oos_end_ts - window.oos_start_ts, DAY_MS);
        }
        assert!(report.overfitting_rate >= 0.0);
    }

    #[test]
    fn too_short_series_is_insufficient_data() {
        let data = market_data(1);
        let grid = ParameterGrid::from_json(r#"{"entryThreshold": [40]}"#).unwrap();
        let config = WalkForwardConfig {
            in_sample_days: 30,
            out_of_sample_days: 10,
            ..Default::default()
        };
        assert!(matches!(
            run_walk_forward(&strategy(), &grid, &data, 10_000.0, &config),
            Err(EngineError::InsufficientData(_))
        ));
    }
}
