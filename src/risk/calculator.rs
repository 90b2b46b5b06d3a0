use crate::config::RiskManagement;
use crate::error::{EngineError, Result};
use crate::types::{Direction, Position, TakeProfitLevel};

/// Protective levels for a candidate entry, before sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeLevels {
    pub stop_loss: f64,
    pub stop_distance: f64,
    /// `(price_percent, size_percent)` pairs resolved to absolute prices;
    /// shares are assigned at sizing time.
    pub take_profit_prices: Vec<f64>,
}

/// ATR-scaled stop and multi-level take-profit layout.
///
/// The stop sits `slMultiplier * ATR` away from entry, widened to the
/// configured minimum distance. Take-profit prices are fixed percentage
/// distances on the profit side.
pub fn plan_levels(
    direction: Direction,
    entry_price: f64,
    atr_percent: f64,
    config: &RiskManagement,
) -> Result<TradeLevels> {
    let sl = &config.stop_loss;
    if atr_percent <= 0.0 {
        return Err(EngineError::InvalidRiskParameters(format!(
            "atr_percent must be > 0, got {atr_percent}"
        )));
    }
    if sl.atr_multiplier <= 0.0 {
        return Err(EngineError::InvalidRiskParameters(format!(
            "sl_multiplier must be > 0, got {}",
            sl.atr_multiplier
        )));
    }
    let size_total: f64 = config.take_profits.iter().map(|tp| tp.size_percent).sum();
    if (size_total - 100.0).abs() > 0.01 {
        return Err(EngineError::InvalidRiskParameters(format!(
            "take-profit sizePercent must sum to 100, got {size_total}"
        )));
    }

    let raw_distance = sl.atr_multiplier * entry_price * atr_percent / 100.0;
    let stop_distance = raw_distance.max(entry_price * sl.min_distance_percent / 100.0);
    let stop_loss = match direction {
        Direction::Long => entry_price - stop_distance,
        Direction::Short => entry_price + stop_distance,
    };

    let take_profit_prices = config
        .take_profits
        .iter()
        .map(|tp| match direction {
            Direction::Long => entry_price * (1.0 + tp.price_percent / 100.0),
            Direction::Short => entry_price * (1.0 - tp.price_percent / 100.0),
        })
        .collect();

    Ok(TradeLevels {
        stop_loss,
        stop_distance,
        take_profit_prices,
    })
}

/// Position size in base-asset units: capped by both the per-trade risk
/// budget against the stop distance and the total exposure cap.
pub fn position_size(
    balance: f64,
    entry_price: f64,
    stop_loss: f64,
    config: &RiskManagement,
) -> f64 {
    let stop_distance = (entry_price - stop_loss).abs();
    if stop_distance == 0.0 || entry_price == 0.0 || balance <= 0.0 {
        return 0.0;
    }
    let risk_amount = balance * config.risk_per_trade_percent / 100.0;
    let size_by_risk = risk_amount / stop_distance;
    let size_by_exposure = balance * config.max_exposure_percent / 100.0 / entry_price;
    size_by_risk.min(size_by_exposure)
}

/// Assemble a sized position. The last take-profit share absorbs float
/// remainder so the shares sum to the position size exactly.
pub fn build_position(
    entry_time: i64,
    entry_price: f64,
    direction: Direction,
    size: f64,
    levels: &TradeLevels,
    config: &RiskManagement,
) -> Position {
    let mut take_profits = Vec::with_capacity(levels.take_profit_prices.len());
    let mut assigned = 0.0;
    let last = levels.take_profit_prices.len() - 1;
    for (i, &price) in levels.take_profit_prices.iter().enumerate() {
        let share = if i == last {
            size - assigned
        } else {
            size * config.take_profits[i].size_percent / 100.0
        };
        assigned += share;
        take_profits.push(TakeProfitLevel {
            level_index: i,
            price,
            size_share: share,
            hit: false,
        });
    }

    Position {
        entry_time,
        entry_price,
        direction,
        size_initial: size,
        remaining_size: size,
        stop_loss: levels.stop_loss,
        stop_distance: levels.stop_distance,
        take_profits,
        trailing_active: false,
        realized_pnl: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StopLossConfig, TakeProfitConfig};

    fn risk_config(tps: Vec<(f64, f64)>) -> RiskManagement {
        RiskManagement {
            stop_loss: StopLossConfig {
                atr_multiplier: 1.5,
                min_distance_percent: 0.5,
            },
            take_profits: tps
                .into_iter()
                .map(|(price, size)| TakeProfitConfig {
                    price_percent: price,
                    size_percent: size,
                })
                .collect(),
            risk_per_trade_percent: 0.5,
            max_exposure_percent: 5.0,
            max_open_positions: 1,
        }
    }

    #[test]
    fn stop_scales_with_atr() {
        let config = risk_config(vec![(5.0, 100.0)]);
        // 1.5 * (100 * 2%) = 3.0 distance.
        let levels = plan_levels(Direction::Long, 100.0, 2.0, &config).unwrap();
        assert!((levels.stop_loss - 97.0).abs() < 1e-12);
        assert!((levels.stop_distance - 3.0).abs() < 1e-12);
        assert!((levels.take_profit_prices[0] - 105.0).abs() < 1e-12);
    }

    #[test]
    fn stop_widened_to_min_distance() {
        let config = risk_config(vec![(5.0, 100.0)]);
        // Raw distance 1.5 * 0.1% = 0.15, below the 0.5% minimum.
        let levels = plan_levels(Direction::Long, 100.0, 0.1, &config).unwrap();
        assert!((levels.stop_loss - 99.5).abs() < 1e-12);
    }

    #[test]
    fn short_levels_mirror_long() {
        let config = risk_config(vec![(5.0, 50.0), (10.0, 50.0)]);
        let levels = plan_levels(Direction::Short, 200.0, 2.0, &config).unwrap();
        assert!(levels.stop_loss > 200.0);
        assert!((levels.take_profit_prices[0] - 190.0).abs() < 1e-12);
        assert!((levels.take_profit_prices[1] - 180.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let config = risk_config(vec![(5.0, 100.0)]);
        assert!(matches!(
            plan_levels(Direction::Long, 100.0, 0.0, &config),
            Err(EngineError::InvalidRiskParameters(_))
        ));

        let mut bad_mult = config.clone();
        bad_mult.stop_loss.atr_multiplier = -1.0;
        assert!(plan_levels(Direction::Long, 100.0, 2.0, &bad_mult).is_err());

        let bad_shares = risk_config(vec![(5.0, 60.0), (10.0, 60.0)]);
        assert!(matches!(
            plan_levels(Direction::Long, 100.0, 2.0, &bad_shares),
            Err(EngineError::InvalidRiskParameters(_))
        ));
    }

    #[test]
    fn size_is_min_of_risk_and_exposure_caps() {
        let config = risk_config(vec![(5.0, 100.0)]);
        // Risk: 10_000 * 0.5% = 50 over distance 5 => 10 units.
        // Exposure: 10_000 * 5% / 100 => 5 units. Exposure cap binds.
        let size = position_size(10_000.0, 100.0, 95.0, &config);
        assert!((size - 5.0).abs() < 1e-12);

        // Wide stop makes the risk cap bind instead.
        let size = position_size(10_000.0, 100.0, 50.0, &config);
        assert!((size - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_size_zero() {
        let config = risk_config(vec![(5.0, 100.0)]);
        assert_eq!(position_size(10_000.0, 100.0, 100.0, &config), 0.0);
        assert_eq!(position_size(0.0, 100.0, 95.0, &config), 0.0);
    }

    #[test]
    fn tp_shares_sum_to_size_exactly() {
        let config = risk_config(vec![(5.0, 33.0), (10.0, 33.0), (15.0, 34.0)]);
        let levels = plan_levels(Direction::Long, 100.0, 2.0, &config).unwrap();
        let position = build_position(0, 100.0, Direction::Long, 0.7, &levels, &config);

        let share_sum: f64 = position.take_profits.iter().map(|tp| tp.size_share).sum();
        assert_eq!(share_sum, position.size_initial);
        assert_eq!(position.take_profits.len(), 3);
        assert_eq!(position.remaining_size, 0.7);
    }
}
