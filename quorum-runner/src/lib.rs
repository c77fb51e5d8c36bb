//! Quorum Runner: configuration, data loading, the backtest engine, reports.
//!
//! This crate builds on `quorum-core` to provide:
//! - TOML run configuration with validation and a deterministic run id
//! - Data loading from CSV, Parquet or synthetic sources
//! - The step loop that drives the agent pipeline across a trading calendar
//! - Performance metrics and JSON/CSV report export

pub mod config;
pub mod data_loader;
pub mod engine;
pub mod metrics;
pub mod report;
pub mod runner;

pub use config::{ConfigError, RunConfig, RunId, SourceConfig};
pub use data_loader::{load_market_data, open_source, LoadError, LoadedData};
pub use engine::{BacktestEngine, RunError};
pub use metrics::PerformanceMetrics;
pub use report::{DecisionLogEntry, LoggedFailure, ReportError, RunReport, RunStatus, SCHEMA_VERSION};
pub use runner::{open_memory, run_backtest, run_backtest_from_data, RunOptions};
