use crate::filters::{ChainVerdict, FilterChain, FilterContext};
use crate::signal::AggregatedSignal;
use crate::types::{Direction, TrendAnalysis};

/// Final verdict on a candidate entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Enter,
    Skip {
        reason: String,
        blocked_by: Option<&'static str>,
    },
}

impl EntryDecision {
    fn skip(reason: impl Into<String>) -> Self {
        EntryDecision::Skip {
            reason: reason.into(),
            blocked_by: None,
        }
    }

    pub fn is_enter(&self) -> bool {
        matches!(self, EntryDecision::Enter)
    }
}

/// Thresholds the orchestrator gates on. `flat_entry_threshold` replaces the
/// strategy threshold while the market reads flat (but not flat enough for
/// the flat-market filter to block outright).
#[derive(Debug, Clone, Copy)]
pub struct EntryGate {
    pub entry_threshold: f64,
    pub flat_entry_threshold: Option<f64>,
    pub market_is_flat: bool,
}

/// Trend-aware gating: restricted direction first, confidence threshold
/// second, then the filter chain; the first blocking filter is named.
pub fn decide(
    direction: Direction,
    aggregated: &AggregatedSignal,
    trend: &TrendAnalysis,
    gate: &EntryGate,
    chain: &FilterChain,
    ctx: &FilterContext<'_>,
    diagnostics: &mut Vec<String>,
) -> EntryDecision {
    if trend.restricts(direction) {
        return EntryDecision::skip(format!(
            "{direction} restricted by {} trend",
            trend.bias
        ));
    }

    let threshold = if gate.market_is_flat {
        gate.flat_entry_threshold.unwrap_or(gate.entry_threshold)
    } else {
        gate.entry_threshold
    };
    if aggregated.confidence < threshold {
        return EntryDecision::skip(format!(
            "confidence {:.1} below threshold {threshold:.1}",
            aggregated.confidence
        ));
    }

    match chain.evaluate(ctx, diagnostics) {
        ChainVerdict { allowed: true, .. } => EntryDecision::Enter,
        ChainVerdict {
            blocked_by, reason, ..
        } => EntryDecision::Skip {
            reason: reason.unwrap_or_else(|| "blocked".to_string()),
            blocked_by,
        },
    }
}
