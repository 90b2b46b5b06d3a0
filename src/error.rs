use thiserror::Error;

/// Error taxonomy for the engine. Each kind carries a fixed propagation
/// policy: config/data/risk errors are fatal, analyzer and filter errors are
/// recoverable per bar, invariant violations are never recovered.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid risk parameters: {0}")]
    InvalidRiskParameters(String),

    #[error("analyzer '{analyzer}' failed: {message}")]
    Analyzer { analyzer: String, message: String },

    #[error("filter '{filter}' failed: {message}")]
    Filter { filter: String, message: String },

    #[error("chunk {chunk_id} failed: {message}")]
    Chunk { chunk_id: usize, message: String },

    #[error("invariant violation [{rule}] at bar {timestamp_ms}: {detail}")]
    InvariantViolation {
        rule: &'static str,
        timestamp_ms: i64,
        detail: String,
    },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// Diagnostic JSON printed to stderr by the CLI on fatal errors.
    pub fn diagnostic_json(&self) -> serde_json::Value {
        match self {
            EngineError::InvariantViolation {
                rule,
                timestamp_ms,
                detail,
            } => serde_json::json!({
                "kind": "InvariantViolation",
                "rule": rule,
                "timestamp_ms": timestamp_ms,
                "detail": detail,
            }),
            EngineError::Config(msg) => serde_json::json!({ "kind": "ConfigError", "detail": msg }),
            EngineError::InsufficientData(msg) => {
                serde_json::json!({ "kind": "InsufficientData", "detail": msg })
            }
            EngineError::InvalidRiskParameters(msg) => {
                serde_json::json!({ "kind": "InvalidRiskParameters", "detail": msg })
            }
            other => serde_json::json!({ "kind": "EngineError", "detail": other.to_string() }),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
