use serde::{Deserialize, Serialize};

use super::Timeframe;

/// One OHLCV bar. Timestamps are UTC milliseconds since epoch; for a given
/// symbol and timeframe candles are strictly ascending by timestamp. Gaps
/// are allowed and must be tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Candle sequences for one symbol across the three working timeframes,
/// optionally paired with the same bundle for a benchmark symbol (BTC by
/// default) used by the correlation filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeframeData {
    pub symbol: String,
    pub m1: Vec<Candle>,
    pub m5: Vec<Candle>,
    pub m15: Vec<Candle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<Box<TimeframeData>>,
}

impl TimeframeData {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }

    pub fn series(&self, timeframe: Timeframe) -> &[Candle] {
        match timeframe {
            Timeframe::M1 => &self.m1,
            Timeframe::M5 => &self.m5,
            Timeframe::M15 => &self.m15,
        }
    }

    pub fn series_mut(&mut self, timeframe: Timeframe) -> &mut Vec<Candle> {
        match timeframe {
            Timeframe::M1 => &mut self.m1,
            Timeframe::M5 => &mut self.m5,
            Timeframe::M15 => &mut self.m15,
        }
    }

    /// Index of the most recent 15m candle with timestamp <= `ts`, if any.
    /// This is the join rule between the 15m context series and lower
    /// timeframe bars.
    pub fn m15_index_at(&self, ts: i64) -> Option<usize> {
        match self.m15.partition_point(|c| c.timestamp_ms <= ts) {
            0 => None,
            n => Some(n - 1),
        }
    }

    /// Copy of this bundle restricted to `[from_ts, to_ts]` on every
    /// timeframe (and the benchmark), used by walk-forward window slicing.
    pub fn slice(&self, from_ts: i64, to_ts: i64) -> TimeframeData {
        let cut = |candles: &[Candle]| -> Vec<Candle> {
            let start = candles.partition_point(|c| c.timestamp_ms < from_ts);
            let end = candles.partition_point(|c| c.timestamp_ms <= to_ts);
            candles[start..end].to_vec()
        };
        TimeframeData {
            symbol: self.symbol.clone(),
            m1: cut(&self.m1),
            m5: cut(&self.m5),
            m15: cut(&self.m15),
            benchmark: self
                .benchmark
                .as_ref()
                .map(|b| Box::new(b.slice(from_ts, to_ts))),
        }
    }

    /// The trailing window of up to `len` 15m candles ending at the most
    /// recent one with timestamp <= `ts`.
    pub fn m15_window_at(&self, ts: i64, len: usize) -> &[Candle] {
        match self.m15_index_at(ts) {
            Some(end) => {
                let start = (end + 1).saturating_sub(len);
                &self.m15[start..=end]
            }
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp_ms: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn m15_join_picks_most_recent_at_or_before() {
        let mut data = TimeframeData::new("ETHUSDT");
        data.m15 = vec![candle(0, 1.0), candle(900_000, 2.0), candle(1_800_000, 3.0)];

        assert_eq!(data.m15_index_at(-1), None);
        assert_eq!(data.m15_index_at(0), Some(0));
        assert_eq!(data.m15_index_at(899_999), Some(0));
        assert_eq!(data.m15_index_at(900_000), Some(1));
        assert_eq!(data.m15_index_at(5_000_000), Some(2));
    }

    #[test]
    fn m15_window_clamps_to_available() {
        let mut data = TimeframeData::new("ETHUSDT");
        data.m15 = (0..5).map(|i| candle(i * 900_000, i as f64)).collect();

        let window = data.m15_window_at(3 * 900_000, 60);
        assert_eq!(window.len(), 4);
        assert_eq!(window.last().unwrap().close, 3.0);
    }
}
