use serde::{Deserialize, Serialize};

use crate::types::{BacktestTrade, EquityPoint, Timeframe};

/// Profit factor sentinel for runs with profits and no losses.
pub const PROFIT_FACTOR_SENTINEL: f64 = 999.0;

/// Fixed metric set over a closed-trade list and an equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

impl PerformanceMetrics {
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            profit_factor: 0.0,
            average_win: 0.0,
            average_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
        }
    }
}

/// Compute the metric set. Trade statistics come from the trade log; the
/// Sharpe ratio and max drawdown come from `equity_curve`, the per-bar
/// `{timestamp, balance}` series the engine appends one point per primary
/// bar. Replay hands in its bar-cadence reconstruction instead (see
/// [`equity_from_trades`]).
pub fn calculate(trades: &[BacktestTrade], equity_curve: &[EquityPoint]) -> PerformanceMetrics {
    if trades.is_empty() {
        return PerformanceMetrics::empty();
    }

    let total_trades = trades.len() as u64;
    let wins: Vec<f64> = trades
        .iter()
        .filter(|t| t.realized_pnl > 0.0)
        .map(|t| t.realized_pnl)
        .collect();
    let losses: Vec<f64> = trades
        .iter()
        .filter(|t| t.realized_pnl < 0.0)
        .map(|t| t.realized_pnl.abs())
        .collect();

    let winning_trades = wins.len() as u64;
    let losing_trades = losses.len() as u64;
    let win_rate = winning_trades as f64 / total_trades as f64;

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum();

    let profit_factor = if gross_loss == 0.0 {
        if gross_profit > 0.0 {
            PROFIT_FACTOR_SENTINEL
        } else {
            0.0
        }
    } else {
        gross_profit / gross_loss
    };

    let average_win = if wins.is_empty() {
        0.0
    } else {
        gross_profit / wins.len() as f64
    };
    let average_loss = if losses.is_empty() {
        0.0
    } else {
        gross_loss / losses.len() as f64
    };
    let largest_win = wins.iter().copied().fold(0.0, f64::max);
    let largest_loss = losses.iter().copied().fold(0.0, f64::max);

    PerformanceMetrics {
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        gross_profit,
        gross_loss,
        profit_factor,
        average_win,
        average_loss,
        largest_win,
        largest_loss,
        sharpe_ratio: sharpe(equity_curve),
        max_drawdown: max_drawdown(equity_curve),
    }
}

/// Per-bar equity curve reconstructed from a trade log: one point per
/// primary-bar period from the first entry to the last exit, with the
/// balance stepped at each realization. This is the closest a replay can
/// get to the engine's own curve (partial fills inside a trade's life are
/// only known in aggregate at its exit).
pub fn equity_from_trades(trades: &[BacktestTrade], initial_balance: f64) -> Vec<EquityPoint> {
    if trades.is_empty() {
        return Vec::new();
    }
    let mut order: Vec<&BacktestTrade> = trades.iter().collect();
    order.sort_by_key(|t| t.exit_time);

    let start_ts = trades.iter().map(|t| t.entry_time).min().unwrap_or(0);
    let end_ts = order[order.len() - 1].exit_time;
    let step = Timeframe::PRIMARY.duration_ms();

    let mut curve = Vec::new();
    let mut balance = initial_balance;
    let mut next = 0usize;
    let mut ts = start_ts;
    while ts < end_ts {
        while next < order.len() && order[next].exit_time <= ts {
            balance += order[next].realized_pnl;
            next += 1;
        }
        curve.push(EquityPoint {
            timestamp: ts,
            balance,
        });
        ts += step;
    }
    while next < order.len() {
        balance += order[next].realized_pnl;
        next += 1;
    }
    curve.push(EquityPoint {
        timestamp: end_ts,
        balance,
    });
    curve
}

/// Annualized Sharpe over the equity return series
/// `r_i = (eq_i - eq_{i-1}) / eq_{i-1}` with the first point contributing a
/// zero return; 0 when the deviation is zero or the curve is too short.
pub fn sharpe(curve: &[EquityPoint]) -> f64 {
    if curve.len() < 2 {
        return 0.0;
    }
    let mut returns = Vec::with_capacity(curve.len());
    // First point = 0.
    returns.push(0.0);
    for w in curve.windows(2) {
        returns.push(if w[0].balance == 0.0 {
            0.0
        } else {
            (w[1].balance - w[0].balance) / w[0].balance
        });
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev * 252f64.sqrt()
}

/// Largest peak-to-trough decline as a fraction of the peak.
pub fn max_drawdown(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for point in curve {
        peak = peak.max(point.balance);
        if peak > 0.0 {
            worst = worst.max((peak - point.balance) / peak);
        }
    }
    worst
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
    fn counts_and_rates() {
        let trades = vec![
            trade(0, 300_000, 50.0),
            trade(300_000, 600_000, -20.0),
            trade(600_000, 900_000, 30.0),
            trade(900_000, 1_200_000, -10.0),
        ];
        let curve = equity_from_trades(&trades, 1_000.0);
        let m = calculate(&trades, &curve);
        assert_eq!(m.total_trades, 4);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.losing_trades, 2);
        assert!((m.win_rate - 0.5).abs() < 1e-12);
        assert!((m.gross_profit - 80.0).abs() < 1e-12);
        assert!((m.gross_loss - 30.0).abs() < 1e-12);
        assert!((m.profit_factor - 80.0 / 30.0).abs() < 1e-12);
        assert!((m.average_win - 40.0).abs() < 1e-12);
        assert!((m.average_loss - 15.0).abs() < 1e-12);
        assert!((m.largest_win - 50.0).abs() < 1e-12);
        assert!((m.largest_loss - 20.0).abs() < 1e-12);
    }

    #[test]
    fn profit_factor_sentinel_with_no_losses() {
        let trades = vec![trade(0, 300_000, 50.0), trade(300_000, 600_000, 25.0)];
        let curve = equity_from_trades(&trades, 1_000.0);
        let m = calculate(&trades, &curve);
        assert_eq!(m.profit_factor, PROFIT_FACTOR_SENTINEL);
        assert_eq!(m.win_rate, 1.0);
    }

    #[test]
    fn profit_factor_zero_when_no_trades_realize_anything() {
        let trades = vec![trade(0, 300_000, 0.0)];
        let curve = equity_from_trades(&trades, 1_000.0);
        let m = calculate(&trades, &curve);
        assert_eq!(m.profit_factor, 0.0);
        assert_eq!(m.winning_trades, 0);
        assert_eq!(m.losing_trades, 0);
    }

    #[test]
    fn empty_trades_give_empty_metrics() {
        assert_eq!(calculate(&[], &[]), PerformanceMetrics::empty());
    }

    #[test]
    fn drawdown_over_peak() {
        let curve = vec![
            EquityPoint { timestamp: 0, balance: 100.0 },
            EquityPoint { timestamp: 1, balance: 120.0 },
            EquityPoint { timestamp: 2, balance: 90.0 },
            EquityPoint { timestamp: 3, balance: 110.0 },
        ];
        let dd = max_drawdown(&curve);
        assert!((dd - 0.25).abs() < 1e-12);
    }

    #[test]
    fn sharpe_zero_for_flat_curve() {
        let curve = vec![
            EquityPoint { timestamp: 0, balance: 100.0 },
            EquityPoint { timestamp: 1, balance: 100.0 },
            EquityPoint { timestamp: 2, balance: 100.0 },
        ];
        assert_eq!(sharpe(&curve), 0.0);
    }

    #[test]
    fn sharpe_series_includes_zero_first_point() {
        // Returns are [0, 0.1, 0.1]: mean 1/15, sample variance 1/300.
        let curve = vec![
            EquityPoint { timestamp: 0, balance: 100.0 },
            EquityPoint { timestamp: 1, balance: 110.0 },
            EquityPoint { timestamp: 2, balance: 121.0 },
        ];
        let expected = (1.0 / 15.0) / (1.0f64 / 300.0).sqrt() * 252f64.sqrt();
        assert!((sharpe(&curve) - expected).abs() < 1e-9);
    }

    #[test]
    fn sharpe_positive_for_mostly_rising_curve() {
        let curve = vec![
            EquityPoint { timestamp: 0, balance: 100.0 },
            EquityPoint { timestamp: 1, balance: 105.0 },
            EquityPoint { timestamp: 2, balance: 104.0 },
            EquityPoint { timestamp: 3, balance: 112.0 },
            EquityPoint { timestamp: 4, balance: 118.0 },
        ];
        assert!(sharpe(&curve) > 0.0);
    }

    #[test]
    fn equity_from_trades_steps_on_bar_cadence() {
        // Entries at bar 0 and bar 1; exits at bar 2 and bar 3.
        let trades = vec![trade(0, 900_000, 10.0), trade(300_000, 600_000, -5.0)];
        let curve = equity_from_trades(&trades, 100.0);
        assert_eq!(curve.len(), 4);
        assert_eq!(curve[0], EquityPoint { timestamp: 0, balance: 100.0 });
        assert_eq!(curve[1], EquityPoint { timestamp: 300_000, balance: 100.0 });
        assert_eq!(curve[2], EquityPoint { timestamp: 600_000, balance: 95.0 });
        assert_eq!(curve[3], EquityPoint { timestamp: 900_000, balance: 105.0 });
    }

    #[test]
    fn equity_from_trades_books_off_grid_exits_at_the_end() {
        // Exit not aligned to the bar grid still lands in the final point.
        let trades = vec![trade(0, 450_000, 10.0)];
        let curve = equity_from_trades(&trades, 100.0);
        assert_eq!(curve.last().unwrap().timestamp, 450_000);
        assert!((curve.last().unwrap().balance - 110.0).abs() < 1e-12);
    }
}
