use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::types::{Candle, Timeframe};

/// Flat-file candle source: a directory of `<SYMBOL>_<TF>.json` files, each
/// holding an array of candles sorted ascending by timestamp.
pub struct JsonSource {
    root: PathBuf,
}

impl JsonSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.root
            .join(format!("{symbol}_{}.json", timeframe.as_str()))
    }

    pub fn load(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Candle>> {
        let path = self.file_path(symbol, timeframe);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut candles = read_candle_file(&path)?;
        candles.retain(|c| c.timestamp_ms >= start_ts && c.timestamp_ms <= end_ts);
        candles.sort_by_key(|c| c.timestamp_ms);
        Ok(candles)
    }
}

fn read_candle_file(path: &Path) -> Result<Vec<Candle>> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| {
        EngineError::Config(format!("invalid candle file {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_candles(dir: &Path, name: &str, candles: &[Candle]) {
        let json = serde_json::to_string(candles).unwrap();
        std::fs::write(dir.join(name), json).unwrap();
    }

    fn candle(ts: i64) -> Candle {
        Candle {
            timestamp_ms: ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 3.0,
        }
    }

    #[test]
    fn loads_and_filters_range() {
        let dir = tempfile::tempdir().unwrap();
        write_candles(
            dir.path(),
            "ETHUSDT_5m.json",
            &[candle(0), candle(300_000), candle(600_000)],
        );

        let source = JsonSource::new(dir.path());
        let candles = source
            .load("ETHUSDT", Timeframe::M5, 300_000, 600_000)
            .unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp_ms, 300_000);
    }

    #[test]
    fn missing_file_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonSource::new(dir.path());
        let candles = source.load("NOPE", Timeframe::M5, 0, i64::MAX).unwrap();
        assert!(candles.is_empty());
    }

    #[test]
    fn unsorted_input_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_candles(
            dir.path(),
            "ETHUSDT_1m.json",
            &[candle(120_000), candle(0), candle(60_000)],
        );
        let source = JsonSource::new(dir.path());
        let candles = source.load("ETHUSDT", Timeframe::M1, 0, i64::MAX).unwrap();
        let ts: Vec<i64> = candles.iter().map(|c| c.timestamp_ms).collect();
        assert_eq!(ts, vec![0, 60_000, 120_000]);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ETHUSDT_15m.json"), "not json").unwrap();
        let source = JsonSource::new(dir.path());
        assert!(source
            .load("ETHUSDT", Timeframe::M15, 0, i64::MAX)
            .is_err());
    }
}
