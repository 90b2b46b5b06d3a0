pub mod backtest;
pub mod chunk;
pub mod metrics;
pub mod orchestrator;
pub mod replay;

pub use backtest::*;
pub use chunk::*;
pub use metrics::{PerformanceMetrics, PROFIT_FACTOR_SENTINEL};
pub use orchestrator::{EntryDecision, EntryGate};
pub use replay::*;
