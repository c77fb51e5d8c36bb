//! CSV directory source: `{dir}/{SYMBOL}.csv` with a
//! `date,open,high,low,close,volume` header.

use super::provider::{DataError, DataSource};
use crate::domain::MarketSnapshot;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Clone)]
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    /// Write snapshots for `symbol` in the format this source reads.
    pub fn write_symbol(&self, symbol: &str, snapshots: &[MarketSnapshot]) -> Result<(), DataError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut writer =
            csv::Writer::from_path(self.path_for(symbol)).map_err(|e| DataError::Csv(e.to_string()))?;
        for s in snapshots {
            writer
                .serialize(CsvRow {
                    date: s.timestamp,
                    open: s.open,
                    high: s.high,
                    low: s.low,
                    close: s.close,
                    volume: s.volume as f64,
                })
                .map_err(|e| DataError::Csv(e.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl DataSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarketSnapshot>, DataError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        let mut reader = csv::Reader::from_path(&path).map_err(|e| DataError::Csv(e.to_string()))?;
        let mut out = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| DataError::Csv(format!("{}:{}: {e}", path.display(), line + 2)))?;
            if row.date < start || row.date > end {
                continue;
            }
            out.push(MarketSnapshot::new(
                symbol,
                row.date,
                row.open,
                row.high,
                row.low,
                row.close,
                row.volume.max(0.0) as u64,
            ));
        }
        Ok(out)
    }
}
