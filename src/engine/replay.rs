use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{BacktestTrade, EquityPoint};

use super::metrics::{self, PerformanceMetrics};

/// Relative tolerance for metric comparison.
const METRIC_TOLERANCE: f64 = 0.01;

/// Metrics and equity curve rebuilt from a recorded trade list, without
/// rerunning the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub metrics: PerformanceMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub final_balance: f64,
    pub violations: Vec<String>,
    pub valid: bool,
}

/// Rebuild metrics and the equity curve from `trades` alone, validating
/// trade integrity along the way.
pub fn replay(trades: &[BacktestTrade], initial_balance: f64) -> ReplayReport {
    let mut violations = Vec::new();
    for (i, trade) in trades.iter().enumerate() {
        if trade.exit_time < trade.entry_time {
            violations.push(format!(
                "trade {i}: exit_time {} before entry_time {}",
                trade.exit_time, trade.entry_time
            ));
        }
        if trade.size <= 0.0 {
            violations.push(format!("trade {i}: non-positive size {}", trade.size));
        }
        if trade.entry_price < 0.0 || trade.exit_price < 0.0 {
            violations.push(format!(
                "trade {i}: negative price (entry {}, exit {})",
                trade.entry_price, trade.exit_price
            ));
        }
    }
    if !violations.is_empty() {
        warn!("replay found {} integrity violations", violations.len());
    }

    // Bar-cadence reconstruction of the equity curve; the engine metrics
    // use the true per-bar curve, so replayed Sharpe matches only to the
    // comparison tolerance.
    let equity_curve = metrics::equity_from_trades(trades, initial_balance);
    let final_balance = equity_curve
        .last()
        .map(|p| p.balance)
        .unwrap_or(initial_balance);
    ReplayReport {
        metrics: metrics::calculate(trades, &equity_curve),
        equity_curve,
        final_balance,
        valid: violations.is_empty(),
        violations,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsComparison {
    pub matches: bool,
    pub mismatches: Vec<String>,
}

/// Two metric sets match when the trade counts agree exactly and every
/// scalar agrees within a 1% relative tolerance.
pub fn compare_metrics(
    original: &PerformanceMetrics,
    replayed: &PerformanceMetrics,
) -> MetricsComparison {
    let mut mismatches = Vec::new();

    if original.total_trades != replayed.total_trades {
        mismatches.push(format!(
            "total_trades: {} != {}",
            original.total_trades, replayed.total_trades
        ));
    }
    if original.winning_trades != replayed.winning_trades {
        mismatches.push(format!(
            "winning_trades: {} != {}",
            original.winning_trades, replayed.winning_trades
        ));
    }
    if original.losing_trades != replayed.losing_trades {
        mismatches.push(format!(
            "losing_trades: {} != {}",
            original.losing_trades, replayed.losing_trades
        ));
    }

    let scalars = [
        ("win_rate", original.win_rate, replayed.win_rate),
        ("gross_profit", original.gross_profit, replayed.gross_profit),
        ("gross_loss", original.gross_loss, replayed.gross_loss),
        ("profit_factor", original.profit_factor, replayed.profit_factor),
        ("average_win", original.average_win, replayed.average_win),
        ("average_loss", original.average_loss, replayed.average_loss),
        ("largest_win", original.largest_win, replayed.largest_win),
        ("largest_loss", original.largest_loss, replayed.largest_loss),
        ("sharpe_ratio", original.sharpe_ratio, replayed.sharpe_ratio),
        ("max_drawdown", original.max_drawdown, replayed.max_drawdown),
    ];
    for (name, a, b) in scalars {
        if !within_tolerance(a, b) {
            mismatches.push(format!("{name}: {a} vs {b}"));
        }
    }

    MetricsComparison {
        matches: mismatches.is_empty(),
        mismatches,
    }
}

fn within_tolerance(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= METRIC_TOLERANCE * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, ExitReason};

    fn trade(entry: i64, exit: i64, pnl: f64) -> BacktestTrade {
        BacktestTrade {
            entry_time: entry,
            entry_price: 100.0,
            direction: Direction::Long,
            size: 1.0,
            stop_loss: 95.0,
            take_profits: Vec::new(),
            exit_time: exit,
            exit_price: 100.0 + pnl,
            exit_reason: ExitReason::TakeProfit,
            realized_pnl: pnl,
            realized_pnl_percent: pnl,
            duration_ms: exit - entry,
        }
    }

    #[test]
    fn replay_rebuilds_balance_and_counts() {
        let trades = vec![
            trade(0, 300_000, 50.0),
            trade(300_000, 600_000, -20.0),
        ];
        let report = replay(&trades, 1_000.0);
        assert!(report.valid);
        assert!((report.final_balance - 1_030.0).abs() < 1e-12);
        assert_eq!(report.metrics.total_trades, 2);
        assert_eq!(report.equity_curve.len(), 3);
        assert!((report.equity_curve[1].balance - 1_050.0).abs() < 1e-12);
    }

    #[test]
    fn integrity_violations_are_reported() {
        let mut bad = trade(100, 50, 10.0); // exit before entry
        bad.size = -1.0;
        let report = replay(&[bad], 1_000.0);
        assert!(!report.valid);
        assert_eq!(report.violations.len(), 2);
    }

    #[test]
    fn comparison_accepts_small_drift() {
        let trades = vec![
            trade(0, 300_000, 50.0),
            trade(300_000, 600_000, -20.0),
        ];
        let curve = metrics::equity_from_trades(&trades, 1_000.0);
        let original = metrics::calculate(&trades, &curve);
        let mut replayed = original.clone();
        replayed.gross_profit *= 1.005; // within 1%
        assert!(compare_metrics(&original, &replayed).matches);
    }

    #[test]
    fn round_trip_from_a_real_backtest() {
        use crate::config::StrategyConfig;
        use crate::engine::{BacktestEngine, RunOptions};
        use crate::types::{Candle, TimeframeData};

        let config = StrategyConfig::from_json(
            r#"{
                "indicators": {"rsiPeriod": 1, "rsiOversold": 99.0},
                "analyzers": [{"name": "rsi_momentum", "weight": 1.0}],
                "entryThreshold": 50,
                "aggregator": {"minTotalScore": 0.0},
                "riskManagement": {
                    "stopLoss": {"atrMultiplier": 1.0, "minDistancePercent": 5.0},
                    "takeProfits": [{"pricePercent": 5.0, "sizePercent": 100.0}]
                }
            }"#,
        )
        .unwrap();

        let mut data = TimeframeData::new("TEST");
        data.m5 = (0..300i64)
            .map(|i| {
                let close = 100.0 + ((i * 41) % 19) as f64 * 0.3 - 2.0;
                Candle {
                    timestamp_ms: i * 300_000,
                    open: close,
                    high: close + 1.5,
                    low: close - 1.5,
                    close,
                    volume: 100.0,
                }
            })
            .collect();

        let mut engine = BacktestEngine::new(config).unwrap();
        let report = engine.run(&data, 10_000.0, &RunOptions::default()).unwrap();
        assert!(!report.trades.is_empty());

        let replayed = replay(&report.trades, 10_000.0);
        assert!(replayed.valid);
        assert!((replayed.final_balance - report.final_balance).abs() < 1e-9);

        let comparison = compare_metrics(&report.metrics, &replayed.metrics);
        assert!(comparison.matches, "mismatches: {:?}", comparison.mismatches);
        assert_eq!(report.metrics.total_trades, replayed.metrics.total_trades);
    }

    #[test]
    fn comparison_rejects_large_drift_and_count_mismatch() {
        let trades = vec![trade(0, 300_000, 50.0)];
        let curve = metrics::equity_from_trades(&trades, 1_000.0);
        let original = metrics::calculate(&trades, &curve);

        let mut drifted = original.clone();
        drifted.gross_profit *= 1.05;
        let result = compare_metrics(&original, &drifted);
        assert!(!result.matches);

        let mut fewer = original.clone();
        fewer.total_trades = 0;
        assert!(!compare_metrics(&original, &fewer).matches);
    }
}
