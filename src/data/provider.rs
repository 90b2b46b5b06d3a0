use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::types::{Timeframe, TimeframeData};

use super::json_source::JsonSource;
use super::store::SqliteStore;

/// The backends the provider can read from. The engine never writes.
pub enum CandleSource {
    Columnar(SqliteStore),
    Json(JsonSource),
}

/// Read-only multi-timeframe loader: one range query per symbol,
/// post-partitioned into the three working timeframes, plus an optional
/// benchmark bundle for the correlation filter.
pub struct CandleProvider {
    source: CandleSource,
    benchmark_symbol: Option<String>,
}

impl CandleProvider {
    pub fn new(source: CandleSource) -> Self {
        Self {
            source,
            benchmark_symbol: None,
        }
    }

    pub fn with_benchmark(mut self, symbol: &str) -> Self {
        self.benchmark_symbol = Some(symbol.to_string());
        self
    }

    /// Load `TimeframeData` for `[start_ts, end_ts]` (both optional and
    /// inclusive). Fails with `InsufficientData` when any of the three
    /// timeframes comes back empty; a missing benchmark only warns.
    pub async fn load(
        &self,
        symbol: &str,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
    ) -> Result<TimeframeData> {
        let start = start_ts.unwrap_or(0);
        let end = end_ts.unwrap_or(i64::MAX);

        let mut data = self.load_bundle(symbol, start, end).await?;
        for timeframe in Timeframe::ALL {
            if data.series(timeframe).is_empty() {
                return Err(EngineError::InsufficientData(format!(
                    "no {timeframe} candles for {symbol} in range"
                )));
            }
        }
        info!(
            "loaded {symbol}: {} x 1m, {} x 5m, {} x 15m",
            data.m1.len(),
            data.m5.len(),
            data.m15.len()
        );

        if let Some(benchmark_symbol) = self
            .benchmark_symbol
            .as_deref()
            .filter(|s| *s != symbol)
        {
            let benchmark = self.load_bundle(benchmark_symbol, start, end).await?;
            if benchmark.m5.is_empty() {
                warn!(
                    "benchmark {benchmark_symbol} has no 5m candles in range; correlation filter will fail open"
                );
            } else {
                data.benchmark = Some(Box::new(benchmark));
            }
        }
        Ok(data)
    }

    async fn load_bundle(&self, symbol: &str, start: i64, end: i64) -> Result<TimeframeData> {
        let mut data = TimeframeData::new(symbol);
        match &self.source {
            CandleSource::Columnar(store) => {
                let (m1, m5, m15) = store.query_range(symbol, start, end).await?;
                data.m1 = m1;
                data.m5 = m5;
                data.m15 = m15;
            }
            CandleSource::Json(source) => {
                for timeframe in Timeframe::ALL {
                    *data.series_mut(timeframe) = source.load(symbol, timeframe, start, end)?;
                }
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    fn candles(n: i64, step_ms: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp_ms: i * step_ms,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 10.0,
            })
            .collect()
    }

    async fn seeded_store(dir: &tempfile::TempDir, symbols: &[&str]) -> SqliteStore {
        let path = dir.path().join("candles.db");
        let store = SqliteStore::open(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        for symbol in symbols {
            store
                .insert_candles(symbol, Timeframe::M1, &candles(30, 60_000))
                .await
                .unwrap();
            store
                .insert_candles(symbol, Timeframe::M5, &candles(10, 300_000))
                .await
                .unwrap();
            store
                .insert_candles(symbol, Timeframe::M15, &candles(4, 900_000))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn loads_all_three_timeframes() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, &["ETHUSDT"]).await;
        let provider = CandleProvider::new(CandleSource::Columnar(store));

        let data = provider.load("ETHUSDT", None, None).await.unwrap();
        assert_eq!(data.m1.len(), 30);
        assert_eq!(data.m5.len(), 10);
        assert_eq!(data.m15.len(), 4);
        assert!(data.benchmark.is_none());
    }

    #[tokio::test]
    async fn missing_timeframe_is_insufficient_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles.db");
        let store = SqliteStore::open(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        // 5m only: 1m and 15m are missing.
        store
            .insert_candles("ETHUSDT", Timeframe::M5, &candles(10, 300_000))
            .await
            .unwrap();

        let provider = CandleProvider::new(CandleSource::Columnar(store));
        let result = provider.load("ETHUSDT", None, None).await;
        assert!(matches!(result, Err(EngineError::InsufficientData(_))));
    }

    #[tokio::test]
    async fn benchmark_bundle_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, &["ETHUSDT", "BTCUSDT"]).await;
        let provider =
            CandleProvider::new(CandleSource::Columnar(store)).with_benchmark("BTCUSDT");

        let data = provider.load("ETHUSDT", None, None).await.unwrap();
        let benchmark = data.benchmark.expect("benchmark bundle");
        assert_eq!(benchmark.symbol, "BTCUSDT");
        assert_eq!(benchmark.m5.len(), 10);
    }

    #[tokio::test]
    async fn json_source_backs_the_same_contract() {
        let dir = tempfile::tempdir().unwrap();
        for (timeframe, step) in [
            (Timeframe::M1, 60_000i64),
            (Timeframe::M5, 300_000),
            (Timeframe::M15, 900_000),
        ] {
            let json = serde_json::to_string(&candles(5, step)).unwrap();
            std::fs::write(
                dir.path()
                    .join(format!("ETHUSDT_{}.json", timeframe.as_str())),
                json,
            )
            .unwrap();
        }

        let provider = CandleProvider::new(CandleSource::Json(JsonSource::new(dir.path())));
        let data = provider.load("ETHUSDT", Some(0), None).await.unwrap();
        assert_eq!(data.m5.len(), 5);
    }
}
