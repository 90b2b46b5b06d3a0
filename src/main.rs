mod analyzers;
mod config;
mod correlation;
mod data;
mod engine;
mod error;
mod filters;
mod indicators;
mod optimize;
mod risk;
mod signal;
mod types;

use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::StrategyConfig;
use data::{CandleProvider, CandleSource, JsonSource, SqliteStore};
use engine::{ChunkExecutor, ExecutionMode, MergedResult};
use error::{EngineError, Result};
use optimize::{
    run_walk_forward, OptimizerConfig, ParameterGrid, ParameterOptimizer, RankingMetric,
    SearchMethod, WalkForwardConfig,
};
use types::{BacktestTrade, EquityPoint, TimeframeData};

const DEFAULT_STORE_PATH: &str = "./data/candles.db";
const DEFAULT_JSON_DIR: &str = "./data";
const DEFAULT_BENCHMARK_SYMBOL: &str = "BTCUSDT";

#[derive(Parser)]
#[command(name = "quantlab")]
#[command(version = "0.1.0")]
#[command(about = "Deterministic strategy backtester with optimization and walk-forward analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest a strategy over stored candles
    Run {
        /// Strategy JSON file
        #[arg(long)]
        strategy: PathBuf,
        /// Symbol to trade (e.g. ETHUSDT)
        #[arg(long)]
        symbol: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end: Option<String>,
        /// Initial balance
        #[arg(long, default_value = "10000")]
        balance: f64,
        /// Max simultaneous open positions
        #[arg(long = "max-pos")]
        max_pos: Option<usize>,
        /// Candle source backend
        #[arg(long, default_value = "columnar")]
        source: String,
        /// Directory for the result JSON
        #[arg(long)]
        output: Option<PathBuf>,
        /// Benchmark symbol for the correlation filter
        #[arg(long, default_value = DEFAULT_BENCHMARK_SYMBOL)]
        benchmark: String,
    },
    /// Grid or random search over a parameter grid
    Optimize {
        /// Base strategy JSON file
        #[arg(long)]
        strategy: PathBuf,
        /// Parameter grid JSON file
        #[arg(long)]
        grid: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value = "10000")]
        balance: f64,
        /// Search method: grid | random
        #[arg(long, default_value = "grid")]
        method: String,
        /// Ranking metric: sharpe | profitFactor | winRate
        #[arg(long, default_value = "sharpe")]
        metric: String,
        /// Cap on combinations for random search
        #[arg(long = "max", default_value = "100")]
        max_combinations: usize,
        /// Worker threads
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value = "columnar")]
        source: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rolling in-sample/out-of-sample overfitting analysis
    Walkforward {
        #[arg(long)]
        strategy: PathBuf,
        #[arg(long)]
        grid: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value = "10000")]
        balance: f64,
        /// In-sample window length in days
        #[arg(long = "in-days")]
        in_days: i64,
        /// Out-of-sample window length in days
        #[arg(long = "oos-days")]
        oos_days: i64,
        #[arg(long, default_value = "sharpe")]
        metric: String,
        /// Overfitting detection threshold on the performance gap
        #[arg(long, default_value = "0.3")]
        threshold: f64,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value = "columnar")]
        source: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Shape of the backtest result file.
#[derive(Serialize)]
struct BacktestResultFile<'a> {
    config: &'a StrategyConfig,
    metrics: &'a engine::PerformanceMetrics,
    trades: &'a [BacktestTrade],
    equity_curve: &'a [EquityPoint],
    start_time: i64,
    end_time: i64,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Err(err) = dispatch(cli.command).await {
        eprintln!("error: {err}");
        eprintln!("{}", err.diagnostic_json());
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            strategy,
            symbol,
            start,
            end,
            balance,
            max_pos,
            source,
            output,
            benchmark,
        } => {
            run_backtest(
                strategy, symbol, start, end, balance, max_pos, source, output, benchmark,
            )
            .await
        }
        Commands::Optimize {
            strategy,
            grid,
            symbol,
            start,
            end,
            balance,
            method,
            metric,
            max_combinations,
            workers,
            source,
            output,
        } => {
            run_optimize(
                strategy,
                grid,
                symbol,
                start,
                end,
                balance,
                method,
                metric,
                max_combinations,
                workers,
                source,
                output,
            )
            .await
        }
        Commands::Walkforward {
            strategy,
            grid,
            symbol,
            start,
            end,
            balance,
            in_days,
            oos_days,
            metric,
            threshold,
            workers,
            source,
            output,
        } => {
            run_walkforward_cmd(
                strategy, grid, symbol, start, end, balance, in_days, oos_days, metric,
                threshold, workers, source, output,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_backtest(
    strategy_path: PathBuf,
    symbol: String,
    start: Option<String>,
    end: Option<String>,
    balance: f64,
    max_pos: Option<usize>,
    source: String,
    output: Option<PathBuf>,
    benchmark: String,
) -> Result<()> {
    let strategy = StrategyConfig::from_file(&strategy_path)?;
    info!(
        "strategy '{}' v{}",
        strategy.metadata.name, strategy.metadata.version
    );

    let data = load_data(&symbol, &source, &start, &end, Some(&benchmark)).await?;
    let (start_time, end_time) = span_of(&data);

    let mut executor = ChunkExecutor::new(strategy.clone(), ExecutionMode::Serial);
    if let Some(max_pos) = max_pos {
        executor = executor.with_max_open_positions(max_pos);
    }
    let merged = executor.run(&data, balance, None)?;
    if !merged.valid {
        return Err(EngineError::Chunk {
            chunk_id: merged.completed_chunks,
            message: merged.errors.join("; "),
        });
    }

    print_summary(&symbol, balance, &merged);

    if let Some(dir) = output {
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(format!("backtest_{symbol}_{start_time}_{end_time}.json"));
        let document = BacktestResultFile {
            config: &strategy,
            metrics: &merged.metrics,
            trades: &merged.trades,
            equity_curve: &merged.equity_curve,
            start_time,
            end_time,
        };
        std::fs::write(&file, serde_json::to_string_pretty(&document)?)?;
        info!("result written to {}", file.display());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_optimize(
    strategy_path: PathBuf,
    grid_path: PathBuf,
    symbol: String,
    start: Option<String>,
    end: Option<String>,
    balance: f64,
    method: String,
    metric: String,
    max_combinations: usize,
    workers: Option<usize>,
    source: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let strategy = StrategyConfig::from_file(&strategy_path)?;
    let grid = ParameterGrid::from_file(&grid_path)?;
    let data = load_data(&symbol, &source, &start, &end, None).await?;

    let config = OptimizerConfig {
        method: SearchMethod::from_str(&method).map_err(EngineError::Config)?,
        metric: RankingMetric::from_str(&metric).map_err(EngineError::Config)?,
        max_combinations,
        workers,
        ..Default::default()
    };
    let mut optimizer = ParameterOptimizer::new(strategy, grid, config);
    let report = optimizer.run(&data, balance)?;

    info!(
        "optimizer: {} tested, {} cached, {} invalid, {} failed in {} ms",
        report.efficiency.tested,
        report.efficiency.cache_savings,
        report.efficiency.skipped_invalid,
        report.efficiency.failed,
        report.efficiency.duration_ms
    );
    emit_json(&report, output, "optimize", &symbol)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_walkforward_cmd(
    strategy_path: PathBuf,
    grid_path: PathBuf,
    symbol: String,
    start: Option<String>,
    end: Option<String>,
    balance: f64,
    in_days: i64,
    oos_days: i64,
    metric: String,
    threshold: f64,
    workers: Option<usize>,
    source: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let strategy = StrategyConfig::from_file(&strategy_path)?;
    let grid = ParameterGrid::from_file(&grid_path)?;
    let data = load_data(&symbol, &source, &start, &end, None).await?;

    let config = WalkForwardConfig {
        in_sample_days: in_days,
        out_of_sample_days: oos_days,
        metric: RankingMetric::from_str(&metric).map_err(EngineError::Config)?,
        detection_threshold: threshold,
        optimizer: OptimizerConfig {
            workers,
            ..Default::default()
        },
    };
    let report = run_walk_forward(&strategy, &grid, &data, balance, &config)?;

    info!(
        "walk-forward: {}/{} windows overfitted (avg score {:.3})",
        report.overfitted_windows, report.total_windows, report.avg_overfitting_score
    );
    emit_json(&report, output, "walkforward", &symbol)?;
    Ok(())
}

async fn load_data(
    symbol: &str,
    source: &str,
    start: &Option<String>,
    end: &Option<String>,
    benchmark: Option<&str>,
) -> Result<TimeframeData> {
    let start_ts = start.as_deref().map(parse_date_ms).transpose()?;
    let end_ts = end
        .as_deref()
        .map(parse_date_ms)
        .transpose()?
        // Inclusive end date: cover the whole day.
        .map(|ts| ts + 86_400_000 - 1);

    let candle_source = match source {
        "columnar" => {
            let path = std::env::var("CANDLE_STORE_PATH")
                .unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string());
            CandleSource::Columnar(SqliteStore::open(&format!("sqlite://{path}")).await?)
        }
        "json" => {
            let dir = std::env::var("CANDLE_STORE_PATH")
                .unwrap_or_else(|_| DEFAULT_JSON_DIR.to_string());
            CandleSource::Json(JsonSource::new(dir))
        }
        other => {
            return Err(EngineError::Config(format!(
                "unknown candle source '{other}' (expected columnar|json)"
            )))
        }
    };

    let mut provider = CandleProvider::new(candle_source);
    if let Some(benchmark) = benchmark {
        provider = provider.with_benchmark(benchmark);
    }
    provider.load(symbol, start_ts, end_ts).await
}

fn parse_date_ms(date: &str) -> Result<i64> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| EngineError::Config(format!("invalid date '{date}': {e}")))?;
    Ok(parsed
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp_millis())
}

fn span_of(data: &TimeframeData) -> (i64, i64) {
    let start = data.m5.first().map(|c| c.timestamp_ms).unwrap_or(0);
    let end = data.m5.last().map(|c| c.timestamp_ms).unwrap_or(0);
    (start, end)
}

fn emit_json<T: Serialize>(
    report: &T,
    output: Option<PathBuf>,
    kind: &str,
    symbol: &str,
) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let file = dir.join(format!("{kind}_{symbol}.json"));
            std::fs::write(&file, json)?;
            info!("result written to {}", file.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_summary(symbol: &str, initial_balance: f64, merged: &MergedResult) {
    let m = &merged.metrics;
    println!("\n{}", "=".repeat(60));
    println!("                 BACKTEST RESULTS  [{symbol}]");
    println!("{}", "=".repeat(60));
    println!("Initial Balance:    ${initial_balance:.2}");
    println!("Final Balance:      ${:.2}", merged.final_balance);
    println!(
        "Net Profit:         ${:.2}",
        merged.final_balance - initial_balance
    );
    println!("{}", "-".repeat(60));
    println!("Total Trades:       {}", m.total_trades);
    println!(
        "Winning / Losing:   {} / {} ({:.1}% win rate)",
        m.winning_trades,
        m.losing_trades,
        m.win_rate * 100.0
    );
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Average Win:        ${:.2}", m.average_win);
    println!("Average Loss:       ${:.2}", m.average_loss);
    println!("Largest Win:        ${:.2}", m.largest_win);
    println!("Largest Loss:       ${:.2}", m.largest_loss);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown * 100.0);
    if !merged.errors.is_empty() {
        println!("{}", "-".repeat(60));
        println!("Diagnostics:        {} entries", merged.errors.len());
    }
    println!("{}", "=".repeat(60));
}
