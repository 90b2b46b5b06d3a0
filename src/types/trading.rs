use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::M1, Timeframe::M5, Timeframe::M15];

    /// The timeframe the engine's main loop steps over.
    pub const PRIMARY: Timeframe = Timeframe::M5;

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" | "M1" => Ok(Timeframe::M1),
            "5m" | "M5" => Ok(Timeframe::M5),
            "15m" | "M15" => Ok(Timeframe::M15),
            other => Err(format!("unknown timeframe: {other}")),
        }
    }
}

/// Direction of an open or proposed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Directional opinion of a single analyzer. `Hold` means no opinion and
/// contributes zero weight to either side of the vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Long,
    Short,
    Hold,
}

impl SignalDirection {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            SignalDirection::Long => Some(Direction::Long),
            SignalDirection::Short => Some(Direction::Short),
            SignalDirection::Hold => None,
        }
    }
}

/// Output of one analyzer for one bar. Confidence is 0..=100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSignal {
    pub source: String,
    pub direction: SignalDirection,
    pub confidence: f64,
    pub weight: f64,
    pub priority: u32,
}

/// Multi-timeframe trend snapshot used for trend-aware entry gating.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendAnalysis {
    pub bias: TrendBias,
    /// Absolute percentage change over the lookback, capped at 100.
    pub strength: f64,
    pub restricted_directions: Vec<Direction>,
}

impl TrendAnalysis {
    pub fn neutral() -> Self {
        Self {
            bias: TrendBias::Neutral,
            strength: 0.0,
            restricted_directions: Vec::new(),
        }
    }

    pub fn restricts(&self, direction: Direction) -> bool {
        self.restricted_directions.contains(&direction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for TrendBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendBias::Bullish => write!(f, "BULLISH"),
            TrendBias::Bearish => write!(f, "BEARISH"),
            TrendBias::Neutral => write!(f, "NEUTRAL"),
        }
    }
}
