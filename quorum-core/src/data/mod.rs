//! Market data: sources, derived indicators, and the time-gated manager.

pub mod csv_source;
pub mod indicators;
pub mod manager;
pub mod parquet;
pub mod provider;
pub mod synthetic;

pub use csv_source::CsvSource;
pub use indicators::{default_indicators, Indicator};
pub use manager::{DataManager, DataView, PrefetchSummary};
pub use parquet::ParquetSource;
pub use provider::{DataError, DataSource, InMemorySource};
pub use synthetic::SyntheticSource;
