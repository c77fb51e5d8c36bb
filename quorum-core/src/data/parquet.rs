//! Parquet directory source: `{dir}/{SYMBOL}.parquet` with columns
//! `date` (Date), `open`, `high`, `low`, `close` (f64), `volume` (u64).

use super::provider::{DataError, DataSource};
use crate::domain::MarketSnapshot;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ParquetSource {
    dir: PathBuf,
}

impl ParquetSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.parquet"))
    }

    /// Write snapshots for `symbol` in the layout this source reads.
    /// Writes are atomic: write to .tmp then rename.
    pub fn write_symbol(&self, symbol: &str, snapshots: &[MarketSnapshot]) -> Result<(), DataError> {
        fs::create_dir_all(&self.dir)?;
        let mut df = snapshots_to_dataframe(snapshots)?;
        let path = self.path_for(symbol);
        let tmp_path = path.with_extension("parquet.tmp");

        let file = fs::File::create(&tmp_path)?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::ParquetError(format!("atomic rename failed: {e}"))
        })?;
        Ok(())
    }
}

impl DataSource for ParquetSource {
    fn name(&self) -> &str {
        "parquet"
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
        let snapshots = load_parquet(&path, symbol)?;
        Ok(snapshots
            .into_iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .collect())
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn snapshots_to_dataframe(snapshots: &[MarketSnapshot]) -> Result<DataFrame, DataError> {
    let dates: Vec<i32> = snapshots
        .iter()
        .map(|s| (s.timestamp - epoch()).num_days() as i32)
        .collect();
    let opens: Vec<f64> = snapshots.iter().map(|s| s.open).collect();
    let highs: Vec<f64> = snapshots.iter().map(|s| s.high).collect();
    let lows: Vec<f64> = snapshots.iter().map(|s| s.low).collect();
    let closes: Vec<f64> = snapshots.iter().map(|s| s.close).collect();
    let volumes: Vec<u64> = snapshots.iter().map(|s| s.volume).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn load_parquet(path: &Path, symbol: &str) -> Result<Vec<MarketSnapshot>, DataError> {
    let file = fs::File::open(path)?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));
    let date_ca = df
        .column("date")
        .map_err(map_err)?
        .date()
        .map_err(|e| DataError::ParquetError(format!("date column type: {e}")))?;
    let open_ca = df.column("open").map_err(map_err)?.f64().map_err(map_err)?;
    let high_ca = df.column("high").map_err(map_err)?.f64().map_err(map_err)?;
    let low_ca = df.column("low").map_err(map_err)?.f64().map_err(map_err)?;
    let close_ca = df.column("close").map_err(map_err)?.f64().map_err(map_err)?;
    let vol_ca = df.column("volume").map_err(map_err)?.u64().map_err(map_err)?;

    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
        out.push(MarketSnapshot::new(
            symbol,
            epoch() + chrono::Duration::days(i64::from(days)),
            open_ca.get(i).unwrap_or(f64::NAN),
            high_ca.get(i).unwrap_or(f64::NAN),
            low_ca.get(i).unwrap_or(f64::NAN),
            close_ca.get(i).unwrap_or(f64::NAN),
            vol_ca.get(i).unwrap_or(0),
        ));
    }
    Ok(out)
}
