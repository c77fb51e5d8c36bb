//! MarketSnapshot: one symbol's OHLCV observation for one session.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OHLCV observation for a single symbol on a single session, plus derived
/// indicator values computed at prefetch time.
///
/// Snapshots are immutable once stored in the `DataManager`. Indicator values
/// at `timestamp` only ever depend on snapshots at or before `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timestamp: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl MarketSnapshot {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: BTreeMap::new(),
        }
    }

    /// A flat bar where every price equals `price`. Handy for scenario tests.
    pub fn flat(symbol: impl Into<String>, timestamp: NaiveDate, price: f64) -> Self {
        Self::new(symbol, timestamp, price, price, price, price, 0)
    }

    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high >= open/close, positive prices.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    /// Read a single field from the snapshot.
    ///
    /// Returns `None` for an indicator that was never computed for this
    /// snapshot. Warmup indicator values are stored as NaN.
    pub fn field(&self, field: &SeriesField) -> Option<f64> {
        match field {
            SeriesField::Open => Some(self.open),
            SeriesField::High => Some(self.high),
            SeriesField::Low => Some(self.low),
            SeriesField::Close => Some(self.close),
            SeriesField::Volume => Some(self.volume as f64),
            SeriesField::Indicator(name) => self.indicators.get(name).copied(),
        }
    }

    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().filter(|v| v.is_finite())
    }
}

/// Column selector for `DataManager::get_series`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Indicator(String),
}

impl SeriesField {
    pub fn indicator(name: impl Into<String>) -> Self {
        Self::Indicator(name.into())
    }
}

impl std::fmt::Display for SeriesField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesField::Open => write!(f, "open"),
            SeriesField::High => write!(f, "high"),
            SeriesField::Low => write!(f, "low"),
            SeriesField::Close => write!(f, "close"),
            SeriesField::Volume => write!(f, "volume"),
            SeriesField::Indicator(name) => write!(f, "{name}"),
        }
    }
}
