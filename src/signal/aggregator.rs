use crate::config::AggregatorSettings;
use crate::types::{AnalyzerSignal, Direction, SignalDirection};

/// Result of the weighted vote over one bar's analyzer signals.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedSignal {
    pub direction: Option<Direction>,
    /// 0..=100 after conflict and blind-zone penalties.
    pub confidence: f64,
    /// Normalized bucket dominance in -0..=1 of the winning side.
    pub total_score: f64,
    pub conflicted: bool,
    pub long_votes: usize,
    pub short_votes: usize,
    pub recommended_entry: bool,
}

impl AggregatedSignal {
    pub fn none() -> Self {
        Self {
            direction: None,
            confidence: 0.0,
            total_score: 0.0,
            conflicted: false,
            long_votes: 0,
            short_votes: 0,
            recommended_entry: false,
        }
    }
}

/// Weighted vote with conflict detection and blind-zone penalty.
///
/// Each non-HOLD signal contributes `weight * confidence / 100` to its
/// side's bucket. The winner's dominance becomes `total_score`; a strong
/// minority flags the result conflicted and damps confidence by the majority
/// share; a winning side carried by fewer than the configured signal count
/// is damped again by that side's blind-zone penalty.
pub fn aggregate(signals: &[AnalyzerSignal], settings: &AggregatorSettings) -> AggregatedSignal {
    let mut long_bucket = 0.0;
    let mut short_bucket = 0.0;
    let mut long_votes = 0usize;
    let mut short_votes = 0usize;
    let mut contributing_weight = 0.0;

    for signal in signals {
        let contribution = signal.weight * (signal.confidence / 100.0);
        match signal.direction {
            SignalDirection::Long => {
                long_bucket += contribution;
                long_votes += 1;
                contributing_weight += signal.weight;
            }
            SignalDirection::Short => {
                short_bucket += contribution;
                short_votes += 1;
                contributing_weight += signal.weight;
            }
            SignalDirection::Hold => {}
        }
    }

    let total = long_bucket + short_bucket;
    if total == 0.0 || contributing_weight == 0.0 {
        return AggregatedSignal::none();
    }

    // A dead tie yields no direction.
    if long_bucket == short_bucket {
        return AggregatedSignal {
            long_votes,
            short_votes,
            ..AggregatedSignal::none()
        };
    }

    let (direction, winner, loser, winner_votes) = if long_bucket > short_bucket {
        (Direction::Long, long_bucket, short_bucket, long_votes)
    } else {
        (Direction::Short, short_bucket, long_bucket, short_votes)
    };

    let total_score = (winner - loser) / total;
    let minority_ratio = loser / total;
    let conflicted = minority_ratio >= settings.conflict_threshold;

    let mut confidence = (100.0 * winner / contributing_weight).min(100.0);
    if conflicted {
        confidence *= 1.0 - minority_ratio;
    }

    let (min_votes, penalty) = match direction {
        Direction::Long => (settings.min_signals_for_long, settings.long_penalty),
        Direction::Short => (settings.min_signals_for_short, settings.short_penalty),
    };
    if winner_votes < min_votes {
        confidence *= penalty;
    }
    let confidence = confidence.min(100.0);

    let recommended_entry =
        total_score >= settings.min_total_score && confidence >= settings.min_confidence;

    AggregatedSignal {
        direction: Some(direction),
        confidence,
        total_score,
        conflicted,
        long_votes,
        short_votes,
        recommended_entry,
    }
}
