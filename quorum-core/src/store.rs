//! Audit persistence: an opaque append/query store of tagged records.
//!
//! Every decision context, fill, closed trade, memory record and
//! decision-log entry is written as `(kind, timestamp, symbol, payload)`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("audit store io error: {0}")]
    Io(#[from] io::Error),

    #[error("audit record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Decision,
    Fill,
    ClosedTrade,
    Memory,
    DecisionLog,
    Equity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: RecordKind,
    pub timestamp: NaiveDate,
    pub symbol: Option<String>,
    pub payload: serde_json::Value,
}

impl AuditRecord {
    pub fn new<T: Serialize>(
        kind: RecordKind,
        timestamp: NaiveDate,
        symbol: Option<&str>,
        payload: &T,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            kind,
            timestamp,
            symbol: symbol.map(str::to_string),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Filter for `AuditStore::query`; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub kind: Option<RecordKind>,
    pub symbol: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl AuditQuery {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.kind.map_or(true, |k| k == record.kind)
            && self
                .symbol
                .as_deref()
                .map_or(true, |s| record.symbol.as_deref() == Some(s))
            && self.from.map_or(true, |d| record.timestamp >= d)
            && self.to.map_or(true, |d| record.timestamp <= d)
    }
}

pub trait AuditStore: Send + Sync {
    fn append(&self, record: AuditRecord) -> Result<(), StoreError>;

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }
}

/// Append-only JSONL file, one record per line.
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlAuditStore {
    /// Open (creating if needed) for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditStore for JsonlAuditStore {
    fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(&record)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        Ok(())
    }

    /// Reads the file back; malformed lines are skipped.
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        self.flush()?;
        let reader = io::BufReader::new(File::open(&self.path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) if query.matches(&record) => out.push(record),
                Ok(_) => {}
                Err(e) => warn!(path = %self.path.display(), error = %e, "skipping malformed audit line"),
            }
        }
        Ok(out)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }
}
