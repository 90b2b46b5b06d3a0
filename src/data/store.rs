use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::types::{Candle, Timeframe};

/// Columnar candle store on SQLite. Candles are keyed by
/// `(symbol, timeframe, timestamp)`; the engine only reads, ingestion is an
/// administrative concern.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) with schema and indexes in place, in WAL
    /// mode for safety against concurrent writers.
    pub async fn open(db_path: &str) -> Result<Self> {
        info!("opening candle store at {db_path}");
        let options = SqliteConnectOptions::from_str(db_path)
            .map_err(EngineError::Store)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Open an existing store and fail fast when the schema or the
    /// required indexes are missing, for deployments where index creation
    /// is an explicit administrative step.
    pub async fn open_existing(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_path)
            .map_err(EngineError::Store)?
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };

        for required in ["idx_candles_sym_tf_ts", "idx_candles_ts"] {
            let found = sqlx::query(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?1",
            )
            .bind(required)
            .fetch_optional(&store.pool)
            .await?;
            if found.is_none() {
                return Err(EngineError::Config(format!(
                    "candle store at {db_path} is missing index {required}"
                )));
            }
        }
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, timeframe, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Composite and timestamp indexes backing the range query. Exposed so
    /// ingestion tooling can call it explicitly.
    pub async fn ensure_indexes(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_sym_tf_ts
            ON candles(symbol, timeframe, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_ts ON candles(timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO candles
                (symbol, timeframe, timestamp, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(symbol)
            .bind(timeframe.as_str())
            .bind(candle.timestamp_ms)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// One three-part union over the working timeframes, post-partitioned
    /// by timeframe with each partition ascending by timestamp.
    pub async fn query_range(
        &self,
        symbol: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<(Vec<Candle>, Vec<Candle>, Vec<Candle>)> {
        let rows = sqlx::query(
            r#"
            SELECT timeframe, timestamp, open, high, low, close, volume
            FROM candles
            WHERE symbol = ?1 AND timeframe = '1m' AND timestamp BETWEEN ?2 AND ?3
            UNION ALL
            SELECT timeframe, timestamp, open, high, low, close, volume
            FROM candles
            WHERE symbol = ?1 AND timeframe = '5m' AND timestamp BETWEEN ?2 AND ?3
            UNION ALL
            SELECT timeframe, timestamp, open, high, low, close, volume
            FROM candles
            WHERE symbol = ?1 AND timeframe = '15m' AND timestamp BETWEEN ?2 AND ?3
            ORDER BY timestamp
            "#,
        )
        .bind(symbol)
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;

        let mut m1 = Vec::new();
        let mut m5 = Vec::new();
        let mut m15 = Vec::new();
        for row in rows {
            let timeframe: String = row.get("timeframe");
            let candle = Candle {
                timestamp_ms: row.get("timestamp"),
                open: row.get("open"),
                high: row.get("high"),
                low: row.get("low"),
                close: row.get("close"),
                volume: row.get("volume"),
            };
            match timeframe.as_str() {
                "1m" => m1.push(candle),
                "5m" => m5.push(candle),
                "15m" => m15.push(candle),
                _ => {}
            }
        }
        Ok((m1, m5, m15))
    }
}
