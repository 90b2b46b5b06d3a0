use serde::{Deserialize, Serialize};

use super::Direction;

/// One partial take-profit target. `size_share` is quantity in the base
/// asset; the shares of all levels sum to the position's initial size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub level_index: usize,
    pub price: f64,
    pub size_share: f64,
    pub hit: bool,
}

/// An open position. The engine treats this as a value transformed
/// bar-by-bar; once fully closed it is folded into a [`BacktestTrade`] and
/// appended to the immutable trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_time: i64,
    pub entry_price: f64,
    pub direction: Direction,
    pub size_initial: f64,
    pub remaining_size: f64,
    pub stop_loss: f64,
    /// Distance between entry and the initial stop; reused as the trailing
    /// distance once trailing activates.
    pub stop_distance: f64,
    pub take_profits: Vec<TakeProfitLevel>,
    pub trailing_active: bool,
    /// PnL already realized by partial take-profit fills.
    pub realized_pnl: f64,
}

impl Position {
    /// Signed PnL of closing `size` units at `price`.
    pub fn pnl_at(&self, price: f64, size: f64) -> f64 {
        match self.direction {
            Direction::Long => (price - self.entry_price) * size,
            Direction::Short => (self.entry_price - price) * size,
        }
    }

    pub fn is_stop_hit(&self, bar_high: f64, bar_low: f64) -> bool {
        match self.direction {
            Direction::Long => bar_low <= self.stop_loss,
            Direction::Short => bar_high >= self.stop_loss,
        }
    }

    pub fn is_tp_hit(&self, tp: &TakeProfitLevel, bar_high: f64, bar_low: f64) -> bool {
        match self.direction {
            Direction::Long => bar_high >= tp.price,
            Direction::Short => bar_low <= tp.price,
        }
    }
}

/// Why a position (or its remainder) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "TP_HIT")]
    TakeProfit,
    #[serde(rename = "SL_HIT")]
    StopLoss,
    #[serde(rename = "TRAILING_STOP")]
    TrailingStop,
    #[serde(rename = "END_OF_BACKTEST")]
    EndOfBacktest,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TP_HIT"),
            ExitReason::StopLoss => write!(f, "SL_HIT"),
            ExitReason::TrailingStop => write!(f, "TRAILING_STOP"),
            ExitReason::EndOfBacktest => write!(f, "END_OF_BACKTEST"),
        }
    }
}

/// A fully closed trade. `realized_pnl` accumulates every partial fill plus
/// the final close; `exit_price` and `exit_reason` describe the final fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub entry_time: i64,
    pub entry_price: f64,
    pub direction: Direction,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<TakeProfitLevel>,
    pub exit_time: i64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub realized_pnl: f64,
    pub realized_pnl_percent: f64,
    pub duration_ms: i64,
}

/// Cash-model account: balance moves only on realized PnL, unrealized PnL is
/// never capitalized.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub balance: f64,
    pub open_positions: Vec<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub balance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(direction: Direction) -> Position {
        Position {
            entry_time: 0,
            entry_price: 100.0,
            direction,
            size_initial: 2.0,
            remaining_size: 2.0,
            stop_loss: match direction {
                Direction::Long => 95.0,
                Direction::Short => 105.0,
            },
            stop_distance: 5.0,
            take_profits: vec![TakeProfitLevel {
                level_index: 0,
                price: match direction {
                    Direction::Long => 105.0,
                    Direction::Short => 95.0,
                },
                size_share: 2.0,
                hit: false,
            }],
            trailing_active: false,
            realized_pnl: 0.0,
        }
    }

    #[test]
    fn pnl_sign_follows_direction() {
        let long = position(Direction::Long);
        assert_eq!(long.pnl_at(105.0, 2.0), 10.0);
        assert_eq!(long.pnl_at(95.0, 2.0), -10.0);

        let short = position(Direction::Short);
        assert_eq!(short.pnl_at(95.0, 2.0), 10.0);
        assert_eq!(short.pnl_at(105.0, 2.0), -10.0);
    }

    #[test]
    fn stop_and_tp_triggers_use_bar_extremes() {
        let long = position(Direction::Long);
        assert!(long.is_stop_hit(101.0, 95.0));
        assert!(!long.is_stop_hit(101.0, 95.01));
        assert!(long.is_tp_hit(&long.take_profits[0], 105.0, 99.0));
        assert!(!long.is_tp_hit(&long.take_profits[0], 104.99, 99.0));

        let short = position(Direction::Short);
        assert!(short.is_stop_hit(105.0, 99.0));
        assert!(short.is_tp_hit(&short.take_profits[0], 101.0, 95.0));
    }
}
