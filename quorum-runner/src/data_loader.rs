//! Data resolution for the runner.
//!
//! Turns the `[data]` section into a concrete `DataSource`, prefetches every
//! configured symbol (plus warmup) into a fresh `DataManager`, and derives the
//! trading calendar from the sessions actually loaded inside `[start, end]`.

use crate::config::{RunConfig, SourceConfig};
use quorum_core::clock::{ClockError, TradingCalendar};
use quorum_core::data::{
    CsvSource, DataError, DataManager, DataSource, ParquetSource, PrefetchSummary, SyntheticSource,
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("data directory '{0}' does not exist")]
    MissingDirectory(PathBuf),

    #[error("no trading sessions between {start} and {end} for the configured symbols")]
    EmptyCalendar {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("calendar error: {0}")]
    Calendar(#[from] ClockError),

    #[error("data error: {0}")]
    Data(#[from] DataError),
}

/// Prefetched data plus the calendar the clock will walk.
#[derive(Debug)]
pub struct LoadedData {
    pub manager: DataManager,
    pub calendar: TradingCalendar,
    pub summary: PrefetchSummary,
    pub source_name: String,
}

/// Build the source named by the configuration.
pub fn open_source(config: &RunConfig) -> Result<Box<dyn DataSource>, LoadError> {
    Ok(match &config.data.source {
        SourceConfig::Csv { dir } => {
            if !dir.is_dir() {
                return Err(LoadError::MissingDirectory(dir.clone()));
            }
            Box::new(CsvSource::new(dir.clone()))
        }
        SourceConfig::Parquet { dir } => {
            if !dir.is_dir() {
                return Err(LoadError::MissingDirectory(dir.clone()));
            }
            Box::new(ParquetSource::new(dir.clone()))
        }
        SourceConfig::Synthetic { start_price } => {
            Box::new(SyntheticSource::new(config.run.seed).with_start_price(*start_price))
        }
    })
}

/// Prefetch `[start - warmup, end]` for every symbol from `source`.
pub fn load_market_data(config: &RunConfig, source: &dyn DataSource) -> Result<LoadedData, LoadError> {
    let manager = DataManager::new(config.data.lag_days);
    let summary = manager.prefetch(source, &config.run.symbols, config.fetch_start(), config.run.end)?;

    let sessions = manager.session_dates(&config.run.symbols);
    let calendar = match TradingCalendar::from_dates(sessions, config.run.start, config.run.end) {
        Ok(calendar) => calendar,
        Err(ClockError::EmptyCalendar) => {
            return Err(LoadError::EmptyCalendar {
                start: config.run.start,
                end: config.run.end,
            })
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        source = source.name(),
        symbols = summary.symbols_loaded,
        snapshots = summary.snapshots,
        rejected = summary.rejected,
        sessions = calendar.len(),
        "market data loaded"
    );
    Ok(LoadedData {
        manager,
        calendar,
        summary,
        source_name: source.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quorum_core::domain::MarketSnapshot;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn synthetic_calendar_is_weekdays_in_range() {
        let config = RunConfig::new(10_000.0, d(2024, 1, 1), d(2024, 1, 31), vec!["SPY".into()]);
        let source = open_source(&config).unwrap();
        let loaded = load_market_data(&config, source.as_ref()).unwrap();
        assert_eq!(loaded.calendar.len(), 23);
        assert_eq!(loaded.calendar.first(), d(2024, 1, 1));
        assert_eq!(loaded.source_name, "synthetic");
        assert!(loaded.summary.snapshots > 23, "warmup sessions are loaded too");
    }

    #[test]
    fn csv_directory_must_exist() {
        let mut config = RunConfig::new(10_000.0, d(2024, 1, 1), d(2024, 1, 31), vec!["SPY".into()]);
        config.data.source = SourceConfig::Csv {
            dir: "/definitely/not/here".into(),
        };
        assert!(matches!(open_source(&config), Err(LoadError::MissingDirectory(_))));
    }

    #[test]
    fn csv_files_drive_the_calendar() {
        let dir = tempfile::tempdir().unwrap();
        let csv = CsvSource::new(dir.path());
        let snaps: Vec<MarketSnapshot> = [d(2024, 2, 1), d(2024, 2, 2), d(2024, 2, 5)]
            .into_iter()
            .map(|date| MarketSnapshot::flat("SPY", date, 100.0))
            .collect();
        csv.write_symbol("SPY", &snaps).unwrap();

        let mut config = RunConfig::new(10_000.0, d(2024, 2, 2), d(2024, 2, 29), vec!["SPY".into()]);
        config.data.source = SourceConfig::Csv {
            dir: dir.path().to_path_buf(),
        };
        let source = open_source(&config).unwrap();
        let loaded = load_market_data(&config, source.as_ref()).unwrap();
        assert_eq!(loaded.calendar.sessions(), &[d(2024, 2, 2), d(2024, 2, 5)]);
    }

    #[test]
    fn range_without_sessions_is_an_error() {
        let config = RunConfig::new(10_000.0, d(2024, 1, 6), d(2024, 1, 7), vec!["SPY".into()]);
        let source = open_source(&config).unwrap();
        let err = load_market_data(&config, source.as_ref()).unwrap_err();
        assert!(matches!(err, LoadError::EmptyCalendar { .. }));
    }
}
