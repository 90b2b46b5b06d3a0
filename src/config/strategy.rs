use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Declarative strategy document. Unknown fields are tolerated for forward
/// compatibility; `analyzers`, `riskManagement.stopLoss` and
/// `riskManagement.takeProfits` are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub indicators: IndicatorSettings,
    pub analyzers: Vec<AnalyzerConfig>,
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    pub risk_management: RiskManagement,
    #[serde(default)]
    pub aggregator: AggregatorSettings,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub analyzer_failure: AnalyzerFailureMode,
}

fn default_entry_threshold() -> f64 {
    60.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Shared indicator parameters consulted by the analyzers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSettings {
    #[serde(default = "d_ema_fast")]
    pub ema_fast_period: usize,
    #[serde(default = "d_ema_slow")]
    pub ema_slow_period: usize,
    #[serde(default = "d_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "d_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "d_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "d_macd_fast")]
    pub macd_fast_period: usize,
    #[serde(default = "d_macd_slow")]
    pub macd_slow_period: usize,
    #[serde(default = "d_macd_signal")]
    pub macd_signal_period: usize,
    #[serde(default = "d_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "d_bollinger_std")]
    pub bollinger_std_dev: f64,
    #[serde(default = "d_atr_period")]
    pub atr_period: usize,
    #[serde(default = "d_volume_period")]
    pub volume_period: usize,
    #[serde(default = "d_volume_threshold")]
    pub volume_surge_threshold: f64,
    #[serde(default = "d_breakout_lookback")]
    pub breakout_lookback: usize,
}

fn d_ema_fast() -> usize {
    9
}
fn d_ema_slow() -> usize {
    21
}
fn d_rsi_period() -> usize {
    14
}
fn d_rsi_overbought() -> f64 {
    70.0
}
fn d_rsi_oversold() -> f64 {
    30.0
}
fn d_macd_fast() -> usize {
    12
}
fn d_macd_slow() -> usize {
    26
}
fn d_macd_signal() -> usize {
    9
}
fn d_bollinger_period() -> usize {
    20
}
fn d_bollinger_std() -> f64 {
    2.0
}
fn d_atr_period() -> usize {
    14
}
fn d_volume_period() -> usize {
    20
}
fn d_volume_threshold() -> f64 {
    1.5
}
fn d_breakout_lookback() -> usize {
    20
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            ema_fast_period: d_ema_fast(),
            ema_slow_period: d_ema_slow(),
            rsi_period: d_rsi_period(),
            rsi_overbought: d_rsi_overbought(),
            rsi_oversold: d_rsi_oversold(),
            macd_fast_period: d_macd_fast(),
            macd_slow_period: d_macd_slow(),
            macd_signal_period: d_macd_signal(),
            bollinger_period: d_bollinger_period(),
            bollinger_std_dev: d_bollinger_std(),
            atr_period: d_atr_period(),
            volume_period: d_volume_period(),
            volume_surge_threshold: d_volume_threshold(),
            breakout_lookback: d_breakout_lookback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub weight: f64,
    #[serde(default)]
    pub priority: u32,
}

fn d_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskManagement {
    pub stop_loss: StopLossConfig,
    pub take_profits: Vec<TakeProfitConfig>,
    #[serde(default = "d_risk_per_trade")]
    pub risk_per_trade_percent: f64,
    #[serde(default = "d_max_exposure")]
    pub max_exposure_percent: f64,
    #[serde(default = "d_max_open_positions")]
    pub max_open_positions: usize,
}

fn d_risk_per_trade() -> f64 {
    0.5
}
fn d_max_exposure() -> f64 {
    5.0
}
fn d_max_open_positions() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopLossConfig {
    pub atr_multiplier: f64,
    #[serde(default = "d_min_sl_distance")]
    pub min_distance_percent: f64,
}

fn d_min_sl_distance() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeProfitConfig {
    /// Distance from entry, percent of entry price.
    pub price_percent: f64,
    /// Share of the position closed at this level, percent of size.
    pub size_percent: f64,
}

/// Weighted-vote thresholds for the signal aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorSettings {
    #[serde(default = "d_conflict_threshold")]
    pub conflict_threshold: f64,
    #[serde(default = "d_min_signals")]
    pub min_signals_for_long: usize,
    #[serde(default = "d_min_signals")]
    pub min_signals_for_short: usize,
    #[serde(default = "d_long_penalty")]
    pub long_penalty: f64,
    #[serde(default = "d_short_penalty")]
    pub short_penalty: f64,
    #[serde(default = "d_min_total_score")]
    pub min_total_score: f64,
    #[serde(default)]
    pub min_confidence: f64,
}

fn d_conflict_threshold() -> f64 {
    0.4
}
fn d_min_signals() -> usize {
    3
}
fn d_long_penalty() -> f64 {
    0.85
}
fn d_short_penalty() -> f64 {
    0.90
}
fn d_min_total_score() -> f64 {
    0.1
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            conflict_threshold: d_conflict_threshold(),
            min_signals_for_long: d_min_signals(),
            min_signals_for_short: d_min_signals(),
            long_penalty: d_long_penalty(),
            short_penalty: d_short_penalty(),
            min_total_score: d_min_total_score(),
            min_confidence: 0.0,
        }
    }
}

/// Per-filter overrides. A filter whose block is absent, or present with
/// `enabled: false`, is skipped by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiltersConfig {
    pub flat_market: Option<FlatMarketConfig>,
    pub funding_rate: Option<FundingRateConfig>,
    pub btc_correlation: Option<BtcCorrelationConfig>,
    pub trend_alignment: Option<TrendAlignmentConfig>,
    pub post_tp_cooldown: Option<PostTpCooldownConfig>,
    pub time_of_day: Option<TimeOfDayConfig>,
    pub volatility_regime: Option<VolatilityRegimeConfig>,
    pub neutral_trend_strength: Option<NeutralTrendStrengthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMarketConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_flat_threshold")]
    pub flat_threshold: f64,
    #[serde(default = "d_flat_lookback")]
    pub lookback: usize,
    /// Confidence floor that replaces `entryThreshold` while the market is
    /// flat but below the blocking threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_threshold: Option<f64>,
}

fn d_flat_threshold() -> f64 {
    70.0
}
fn d_flat_lookback() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRateConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_funding_long")]
    pub block_long_above: f64,
    #[serde(default = "d_funding_short")]
    pub block_short_below: f64,
}

fn d_funding_long() -> f64 {
    0.0005
}
fn d_funding_short() -> f64 {
    -0.0005
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcCorrelationConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_corr_lookback")]
    pub lookback: usize,
    #[serde(default = "d_corr_threshold")]
    pub threshold: f64,
}

fn d_corr_lookback() -> usize {
    20
}
fn d_corr_threshold() -> f64 {
    0.4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAlignmentConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Minimum trend strength (percent move over the 15m lookback) before
    /// counter-trend directions are restricted.
    #[serde(default = "d_restrict_strength")]
    pub min_strength_to_restrict: f64,
}

fn d_restrict_strength() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostTpCooldownConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_cooldown_seconds")]
    pub block_duration_seconds: i64,
}

fn d_cooldown_seconds() -> i64 {
    300
}

/// Blocks entries inside a UTC hour window `[startHour, endHour)`; the
/// window may wrap midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOfDayConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatilityRegimeConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_low_atr")]
    pub low_atr_percent: f64,
    #[serde(default = "d_high_atr")]
    pub high_atr_percent: f64,
}

fn d_low_atr() -> f64 {
    0.1
}
fn d_high_atr() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeutralTrendStrengthConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_weak_trend")]
    pub weak_trend_threshold: f64,
    #[serde(default = "d_weak_neutral_confidence")]
    pub min_confidence_for_weak_neutral: f64,
}

fn d_weak_trend() -> f64 {
    40.0
}
fn d_weak_neutral_confidence() -> f64 {
    70.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerFailureMode {
    #[default]
    Lenient,
    Strict,
}

impl StrategyConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StrategyConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid strategy document: {e}")))?;
        config
            .validate()
            .map_err(|errors| EngineError::Config(errors.join("; ")))?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read strategy file {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.analyzers.is_empty() {
            errors.push("analyzers must not be empty".to_string());
        }
        for analyzer in &self.analyzers {
            if !(0.0..=1.0).contains(&analyzer.weight) {
                errors.push(format!(
                    "analyzer '{}': weight {} outside [0, 1]",
                    analyzer.name, analyzer.weight
                ));
            }
        }
        if self.analyzers.iter().filter(|a| a.enabled).count() > 0
            && self
                .analyzers
                .iter()
                .filter(|a| a.enabled)
                .all(|a| a.weight == 0.0)
        {
            errors.push("all enabled analyzers have zero weight".to_string());
        }

        if !(0.0..=100.0).contains(&self.entry_threshold) {
            errors.push(format!(
                "entryThreshold {} outside [0, 100]",
                self.entry_threshold
            ));
        }

        if self.risk_management.stop_loss.atr_multiplier <= 0.0 {
            errors.push("riskManagement.stopLoss.atrMultiplier must be > 0".to_string());
        }
        if self.risk_management.take_profits.is_empty() {
            errors.push("riskManagement.takeProfits must not be empty".to_string());
        }
        let tp_total: f64 = self
            .risk_management
            .take_profits
            .iter()
            .map(|tp| tp.size_percent)
            .sum();
        if !self.risk_management.take_profits.is_empty() && (tp_total - 100.0).abs() > 0.01 {
            errors.push(format!(
                "takeProfits sizePercent must sum to 100, got {tp_total}"
            ));
        }
        for tp in &self.risk_management.take_profits {
            if tp.price_percent <= 0.0 {
                errors.push(format!("takeProfit pricePercent {} must be > 0", tp.price_percent));
            }
        }
        if self.risk_management.risk_per_trade_percent <= 0.0 {
            errors.push("riskPerTradePercent must be > 0".to_string());
        }
        if self.risk_management.max_open_positions == 0 {
            errors.push("maxOpenPositions must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn enabled_analyzers(&self) -> impl Iterator<Item = &AnalyzerConfig> {
        self.analyzers.iter().filter(|a| a.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn minimal_json() -> &'static str {
        r#"{
            "metadata": {"name": "test", "version": "1"},
            "analyzers": [
                {"name": "ema_trend", "weight": 0.4},
                {"name": "rsi_momentum", "weight": 0.3, "priority": 1}
            ],
            "entryThreshold": 55,
            "riskManagement": {
                "stopLoss": {"atrMultiplier": 1.5, "minDistancePercent": 0.5},
                "takeProfits": [
                    {"pricePercent": 5.0, "sizePercent": 50.0},
                    {"pricePercent": 10.0, "sizePercent": 50.0}
                ]
            }
        }"#
    }

    #[test]
    fn parses_minimal_document_with_defaults() {
        let config = StrategyConfig::from_json(minimal_json()).unwrap();
        assert_eq!(config.analyzers.len(), 2);
        assert_eq!(config.entry_threshold, 55.0);
        assert_eq!(config.risk_management.risk_per_trade_percent, 0.5);
        assert_eq!(config.risk_management.max_exposure_percent, 5.0);
        assert_eq!(config.aggregator.conflict_threshold, 0.4);
        assert_eq!(config.analyzer_failure, AnalyzerFailureMode::Lenient);
        assert!(config.filters.flat_market.is_none());
    }

    #[test]
    fn tolerates_unknown_fields() {
        let json = minimal_json().replacen(
            "\"metadata\"",
            "\"futureField\": {\"x\": 1}, \"metadata\"",
            1,
        );
        assert!(StrategyConfig::from_json(&json).is_ok());
    }

    #[test]
    fn rejects_missing_analyzers() {
        let json = r#"{
            "riskManagement": {
                "stopLoss": {"atrMultiplier": 1.5},
                "takeProfits": [{"pricePercent": 5.0, "sizePercent": 100.0}]
            }
        }"#;
        assert!(matches!(
            StrategyConfig::from_json(json),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn rejects_missing_stop_loss() {
        let json = r#"{
            "analyzers": [{"name": "ema_trend", "weight": 0.5}],
            "riskManagement": {
                "takeProfits": [{"pricePercent": 5.0, "sizePercent": 100.0}]
            }
        }"#;
        assert!(StrategyConfig::from_json(json).is_err());
    }

    #[test]
    fn rejects_tp_shares_not_summing_to_100() {
        let json = minimal_json().replace("\"sizePercent\": 50.0", "\"sizePercent\": 40.0");
        assert!(StrategyConfig::from_json(&json).is_err());
    }

    #[test]
    fn rejects_weight_outside_unit_interval() {
        let json = minimal_json().replace("\"weight\": 0.4", "\"weight\": 1.4");
        assert!(StrategyConfig::from_json(&json).is_err());
    }
}
