//! Data source trait and structured error types.
//!
//! The `DataSource` trait abstracts over where snapshots come from (CSV,
//! Parquet, synthetic, in-memory). Sources are not time-aware: all temporal
//! filtering is owned by the `DataManager`, which is the only caller of
//! `fetch`.

use crate::domain::{MarketSnapshot, SeriesField};
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    /// Fewer than `window` observations are visible at the cutoff. Callers
    /// treat this as a missing signal, never as a run failure.
    #[error("insufficient history for {symbol}/{field}: wanted {wanted}, {available} visible at {cutoff}")]
    InsufficientHistory {
        symbol: String,
        field: SeriesField,
        wanted: usize,
        available: usize,
        cutoff: NaiveDate,
    },

    /// A read would have returned data timestamped after the cutoff. Fatal.
    #[error("temporal violation for {symbol}: observed {observed} after cutoff {cutoff}")]
    TemporalViolation {
        symbol: String,
        observed: NaiveDate,
        cutoff: NaiveDate,
    },

    /// An ingest would have changed data already served at an earlier cutoff. Fatal.
    #[error("retroactive write for {symbol}: {timestamp} is at or before served cutoff {served}")]
    RetroactiveWrite {
        symbol: String,
        timestamp: NaiveDate,
        served: NaiveDate,
    },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Whether this error invalidates the audit trail and must stop the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DataError::TemporalViolation { .. } | DataError::RetroactiveWrite { .. }
        )
    }
}

/// Trait for historical data sources.
///
/// Implementations fetch every snapshot they have for a symbol over a date
/// range; they do not need to filter, sort or validate.
pub trait DataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch snapshots for a symbol over `[start, end]`.
    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarketSnapshot>, DataError>;
}

/// Fixed in-memory snapshots, keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    series: HashMap<String, Vec<MarketSnapshot>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: impl Into<String>, snapshots: Vec<MarketSnapshot>) -> Self {
        self.insert(symbol, snapshots);
        self
    }

    pub fn insert(&mut self, symbol: impl Into<String>, snapshots: Vec<MarketSnapshot>) {
        self.series.insert(symbol.into(), snapshots);
    }

    /// Closing-price series on consecutive calendar entries (OHLC all equal to close).
    pub fn from_closes(symbol: &str, sessions: &[NaiveDate], closes: &[f64]) -> Self {
        let snapshots = sessions
            .iter()
            .zip(closes)
            .map(|(&date, &close)| MarketSnapshot::flat(symbol, date, close))
            .collect();
        Self::new().with_series(symbol, snapshots)
    }
}

impl DataSource for InMemorySource {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarketSnapshot>, DataError> {
        let series = self
            .series
            .get(symbol)
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;
        Ok(series
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_source_filters_range() {
        let days: Vec<NaiveDate> = (2..=6)
            .map(|d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
            .collect();
        let source = InMemorySource::from_closes("SPY", &days, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = source.fetch("SPY", days[1], days[3]).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].close, 2.0);
        assert!(matches!(
            source.fetch("QQQ", days[0], days[4]),
            Err(DataError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn only_temporal_errors_are_fatal() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(DataError::TemporalViolation {
            symbol: "SPY".into(),
            observed: d,
            cutoff: d
        }
        .is_fatal());
        assert!(!DataError::InsufficientHistory {
            symbol: "SPY".into(),
            field: SeriesField::Close,
            wanted: 5,
            available: 1,
            cutoff: d
        }
        .is_fatal());
    }
}
