//! DataManager: single source of historical truth behind a hard temporal wall.
//!
//! Every read takes an `AsOf` and only sees snapshots with
//! `timestamp <= as_of - lag`. Served results are memoised under the exact
//! cutoff they were served at and never evicted, and ingest refuses any
//! snapshot at or before the highest cutoff already served for its symbol.
//! Together these make the answer to a query at t1 immutable once given:
//! nothing observed later can retroactively change it.

use super::indicators::{annotate, default_indicators, Indicator};
use super::provider::{DataError, DataSource};
use crate::clock::AsOf;
use crate::domain::{MarketSnapshot, SeriesField};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Memoisation key: every cache entry is tagged with the cutoff it was served under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    symbol: String,
    field: SeriesField,
    window: usize,
    cutoff: NaiveDate,
}

/// Outcome of a `prefetch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchSummary {
    pub symbols_loaded: usize,
    pub symbols_skipped: usize,
    pub snapshots: usize,
    pub rejected: usize,
}

pub struct DataManager {
    lag: Duration,
    indicators: Vec<Box<dyn Indicator>>,
    series: RwLock<HashMap<String, Arc<Vec<MarketSnapshot>>>>,
    coverage: RwLock<HashMap<String, (NaiveDate, NaiveDate)>>,
    served: Mutex<HashMap<String, NaiveDate>>,
    cache: Mutex<HashMap<SeriesKey, Arc<[f64]>>>,
}

impl std::fmt::Debug for DataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManager")
            .field("lag_days", &self.lag.num_days())
            .field("indicators", &self.indicators.len())
            .finish_non_exhaustive()
    }
}

impl DataManager {
    /// A manager with the default indicator set and `lag_days` publication delay.
    pub fn new(lag_days: u32) -> Self {
        Self::with_indicators(lag_days, default_indicators())
    }

    pub fn with_indicators(lag_days: u32, indicators: Vec<Box<dyn Indicator>>) -> Self {
        Self {
            lag: Duration::days(i64::from(lag_days)),
            indicators,
            series: RwLock::new(HashMap::new()),
            coverage: RwLock::new(HashMap::new()),
            served: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn lag_days(&self) -> i64 {
        self.lag.num_days()
    }

    /// Latest timestamp visible at `as_of`.
    pub fn cutoff(&self, as_of: AsOf) -> NaiveDate {
        as_of.date() - self.lag
    }

    /// Read handle bound to one decision time, handed to agents.
    pub fn view(&self, as_of: AsOf) -> DataView<'_> {
        DataView { manager: self, as_of }
    }

    /// Populate the cache for `symbols` over `[start, end]`.
    ///
    /// Idempotent: a symbol whose loaded range already covers the request is
    /// skipped. Fetches and indicator computation run in parallel across
    /// symbols; insertion happens afterwards in symbol order.
    pub fn prefetch(
        &self,
        source: &dyn DataSource,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PrefetchSummary, DataError> {
        let mut summary = PrefetchSummary::default();

        let pending: Vec<&String> = {
            let coverage = self.coverage.read().unwrap_or_else(PoisonError::into_inner);
            symbols
                .iter()
                .filter(|s| match coverage.get(s.as_str()) {
                    Some(&(lo, hi)) => !(lo <= start && hi >= end),
                    None => true,
                })
                .collect()
        };
        summary.symbols_skipped = symbols.len() - pending.len();

        let fetched: Vec<(String, Vec<MarketSnapshot>, usize)> = pending
            .par_iter()
            .map(|symbol| {
                let raw = source.fetch(symbol, start, end)?;
                let (clean, rejected) = sanitize(symbol, raw);
                Ok((symbol.to_string(), clean, rejected))
            })
            .collect::<Result<_, DataError>>()?;

        for (symbol, fresh, rejected) in fetched {
            summary.rejected += rejected;
            let merged = self.merge(&symbol, fresh)?;
            summary.snapshots += merged;
            summary.symbols_loaded += 1;

            let mut coverage = self.coverage.write().unwrap_or_else(PoisonError::into_inner);
            let range = coverage.entry(symbol.clone()).or_insert((start, end));
            range.0 = range.0.min(start);
            range.1 = range.1.max(end);
        }

        info!(
            source = source.name(),
            loaded = summary.symbols_loaded,
            skipped = summary.symbols_skipped,
            snapshots = summary.snapshots,
            rejected = summary.rejected,
            "prefetch complete"
        );
        Ok(summary)
    }

    /// Append a single late-arriving snapshot.
    ///
    /// Fails with `RetroactiveWrite` if the snapshot is at or before a cutoff
    /// already served for its symbol.
    pub fn ingest(&self, snapshot: MarketSnapshot) -> Result<(), DataError> {
        if !snapshot.is_sane() {
            return Err(DataError::ValidationError(format!(
                "insane snapshot for {} at {}",
                snapshot.symbol, snapshot.timestamp
            )));
        }
        let symbol = snapshot.symbol.clone();
        self.merge(&symbol, vec![snapshot])?;
        Ok(())
    }

    /// Merge sanitized snapshots into a symbol's series and recompute indicators.
    /// Returns the number of new snapshots stored.
    ///
    /// Timestamps already held are dropped before the served-cutoff check, so
    /// re-delivering known history is a no-op rather than a retroactive write.
    /// The check and the insert both happen under the series write lock.
    fn merge(&self, symbol: &str, fresh: Vec<MarketSnapshot>) -> Result<usize, DataError> {
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let existing = series.get(symbol).cloned();
        let known: BTreeSet<NaiveDate> = existing
            .iter()
            .flat_map(|snaps| snaps.iter().map(|s| s.timestamp))
            .collect();
        let fresh: Vec<MarketSnapshot> = fresh
            .into_iter()
            .filter(|s| !known.contains(&s.timestamp))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        if let Some(served) = self.served_cutoff(symbol) {
            if let Some(early) = fresh.iter().find(|s| s.timestamp <= served) {
                return Err(DataError::RetroactiveWrite {
                    symbol: symbol.to_string(),
                    timestamp: early.timestamp,
                    served,
                });
            }
        }

        let added = fresh.len();
        let mut combined: Vec<MarketSnapshot> = existing
            .map(|snaps| snaps.as_ref().clone())
            .unwrap_or_default();
        combined.extend(fresh);
        combined.sort_by_key(|s| s.timestamp);
        annotate(&mut combined, &self.indicators);
        series.insert(symbol.to_string(), Arc::new(combined));
        Ok(added)
    }

    /// The most recent `window` values of `field` with timestamp <= cutoff.
    ///
    /// Fails with `InsufficientHistory` when fewer than `window` finite values
    /// are visible (indicator warmup values count as missing).
    pub fn get_series(
        &self,
        symbol: &str,
        field: &SeriesField,
        window: usize,
        as_of: AsOf,
    ) -> Result<Arc<[f64]>, DataError> {
        let cutoff = self.cutoff(as_of);
        let key = SeriesKey {
            symbol: symbol.to_string(),
            field: field.clone(),
            window,
            cutoff,
        };

        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(hit));
        }

        let values: Arc<[f64]> = self.read_visible(symbol, cutoff, |visible| {
            let tail = &visible[visible.len().saturating_sub(window)..];
            let values: Vec<f64> = tail.iter().filter_map(|s| s.field(field)).collect();
            let finite = values.iter().rev().take_while(|v| v.is_finite()).count();
            if finite < window {
                return Err(DataError::InsufficientHistory {
                    symbol: symbol.to_string(),
                    field: field.clone(),
                    wanted: window,
                    available: finite,
                    cutoff,
                });
            }
            guard_cutoff(symbol, tail, cutoff)?;
            Ok(values.into())
        })?;

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| Arc::clone(&values));
        debug!(symbol, %field, window, %cutoff, "served series");
        Ok(values)
    }

    /// Up to `max` most recent visible snapshots, oldest first.
    ///
    /// Fails with `InsufficientHistory` only when nothing is visible.
    pub fn visible_snapshots(
        &self,
        symbol: &str,
        max: usize,
        as_of: AsOf,
    ) -> Result<Vec<MarketSnapshot>, DataError> {
        let cutoff = self.cutoff(as_of);
        self.read_visible(symbol, cutoff, |visible| {
            if visible.is_empty() {
                return Err(DataError::InsufficientHistory {
                    symbol: symbol.to_string(),
                    field: SeriesField::Close,
                    wanted: 1,
                    available: 0,
                    cutoff,
                });
            }
            let tail = &visible[visible.len().saturating_sub(max)..];
            guard_cutoff(symbol, tail, cutoff)?;
            Ok(tail.to_vec())
        })
    }

    /// Latest visible snapshot.
    pub fn latest(&self, symbol: &str, as_of: AsOf) -> Result<MarketSnapshot, DataError> {
        let mut snaps = self.visible_snapshots(symbol, 1, as_of)?;
        snaps.pop().ok_or_else(|| DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        })
    }

    /// Latest visible close, used as the reference price for fills and marks.
    pub fn latest_close(&self, symbol: &str, as_of: AsOf) -> Result<f64, DataError> {
        Ok(self.latest(symbol, as_of)?.close)
    }

    /// Symbols currently loaded, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let mut symbols: Vec<String> = series.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Every distinct timestamp loaded for `symbols` (calendar construction).
    pub fn session_dates(&self, symbols: &[String]) -> Vec<NaiveDate> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let dates: BTreeSet<NaiveDate> = symbols
            .iter()
            .filter_map(|s| series.get(s))
            .flat_map(|snaps| snaps.iter().map(|s| s.timestamp))
            .collect();
        dates.into_iter().collect()
    }

    /// Highest cutoff ever served for `symbol`.
    pub fn served_cutoff(&self, symbol: &str) -> Option<NaiveDate> {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
    }

    fn mark_served(&self, symbol: &str, cutoff: NaiveDate) {
        let mut served = self.served.lock().unwrap_or_else(PoisonError::into_inner);
        let mark = served.entry(symbol.to_string()).or_insert(cutoff);
        if cutoff > *mark {
            *mark = cutoff;
        }
    }

    /// Run `read` over the snapshots of `symbol` visible at `cutoff`.
    ///
    /// The cutoff is recorded as served while the series read lock is held,
    /// so no merge can slip a snapshot at or before it in between. Unknown
    /// symbols fail without recording anything.
    fn read_visible<R>(
        &self,
        symbol: &str,
        cutoff: NaiveDate,
        read: impl FnOnce(&[MarketSnapshot]) -> Result<R, DataError>,
    ) -> Result<R, DataError> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let snaps = series.get(symbol).ok_or_else(|| DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;
        self.mark_served(symbol, cutoff);
        read(visible_prefix(snaps, cutoff))
    }
}

/// Read handle bound to a single decision time.
#[derive(Debug, Clone, Copy)]
pub struct DataView<'a> {
    manager: &'a DataManager,
    as_of: AsOf,
}

impl<'a> DataView<'a> {
    pub fn as_of(&self) -> AsOf {
        self.as_of
    }

    pub fn cutoff(&self) -> NaiveDate {
        self.manager.cutoff(self.as_of)
    }

    pub fn series(&self, symbol: &str, field: &SeriesField, window: usize) -> Result<Arc<[f64]>, DataError> {
        self.manager.get_series(symbol, field, window, self.as_of)
    }

    pub fn snapshots(&self, symbol: &str, max: usize) -> Result<Vec<MarketSnapshot>, DataError> {
        self.manager.visible_snapshots(symbol, max, self.as_of)
    }

    pub fn latest(&self, symbol: &str) -> Result<MarketSnapshot, DataError> {
        self.manager.latest(symbol, self.as_of)
    }
}

/// Sort, de-duplicate and validate fetched snapshots. Returns the clean
/// series and the number of rejected rows.
fn sanitize(symbol: &str, raw: Vec<MarketSnapshot>) -> (Vec<MarketSnapshot>, usize) {
    let total = raw.len();
    let mut clean: Vec<MarketSnapshot> = raw
        .into_iter()
        .filter(|s| s.is_sane())
        .map(|mut s| {
            s.symbol = symbol.to_string();
            s.indicators.clear();
            s
        })
        .collect();
    clean.sort_by_key(|s| s.timestamp);
    clean.dedup_by_key(|s| s.timestamp);

    let rejected = total - clean.len();
    if rejected > 0 {
        warn!(symbol, rejected, "dropped insane or duplicate snapshots");
    }
    (clean, rejected)
}

fn visible_prefix(series: &[MarketSnapshot], cutoff: NaiveDate) -> &[MarketSnapshot] {
    let idx = series.partition_point(|s| s.timestamp <= cutoff);
    &series[..idx]
}

fn guard_cutoff(symbol: &str, served: &[MarketSnapshot], cutoff: NaiveDate) -> Result<(), DataError> {
    match served.iter().find(|s| s.timestamp > cutoff) {
        Some(late) => Err(DataError::TemporalViolation {
            symbol: symbol.to_string(),
            observed: late.timestamp,
            cutoff,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::InMemorySource;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn loaded(lag: u32) -> DataManager {
        let days: Vec<NaiveDate> = (1..=10).map(day).collect();
        let closes: Vec<f64> = (1..=10).map(|i| 100.0 + i as f64).collect();
        let source = InMemorySource::from_closes("SPY", &days, &closes);
        let dm = DataManager::new(lag);
        dm.prefetch(&source, &["SPY".to_string()], day(1), day(10)).unwrap();
        dm
    }

    #[test]
    fn series_stops_at_cutoff() {
        let dm = loaded(0);
        let closes = dm
            .get_series("SPY", &SeriesField::Close, 3, AsOf::new(day(5)))
            .unwrap();
        assert_eq!(&*closes, &[103.0, 104.0, 105.0]);
    }

    #[test]
    fn lag_shifts_the_cutoff_back() {
        let dm = loaded(2);
        let closes = dm
            .get_series("SPY", &SeriesField::Close, 2, AsOf::new(day(5)))
            .unwrap();
        assert_eq!(&*closes, &[102.0, 103.0]);
        assert_eq!(dm.latest_close("SPY", AsOf::new(day(5))).unwrap(), 103.0);
    }

    #[test]
    fn insufficient_history_reports_availability() {
        let dm = loaded(0);
        match dm.get_series("SPY", &SeriesField::Close, 5, AsOf::new(day(3))) {
            Err(DataError::InsufficientHistory { available, wanted, .. }) => {
                assert_eq!(available, 3);
                assert_eq!(wanted, 5);
            }
            other => panic!("expected InsufficientHistory, got {other:?}"),
        }
    }

    #[test]
    fn prefetch_is_idempotent() {
        let dm = loaded(0);
        let days: Vec<NaiveDate> = (1..=10).map(day).collect();
        let source = InMemorySource::from_closes("SPY", &days, &[1.0; 10]);
        let summary = dm
            .prefetch(&source, &["SPY".to_string()], day(1), day(10))
            .unwrap();
        assert_eq!(summary.symbols_skipped, 1);
        assert_eq!(dm.latest_close("SPY", AsOf::new(day(10))).unwrap(), 110.0);
    }

    #[test]
    fn ingest_before_served_cutoff_is_rejected() {
        let dm = DataManager::new(0);
        let days: Vec<NaiveDate> = vec![day(1), day(2), day(4)];
        let source = InMemorySource::from_closes("SPY", &days, &[1.0, 2.0, 4.0]);
        dm.prefetch(&source, &["SPY".to_string()], day(1), day(4)).unwrap();

        dm.latest("SPY", AsOf::new(day(3))).unwrap();
        let late = MarketSnapshot::flat("SPY", day(3), 3.0);
        assert!(matches!(
            dm.ingest(late),
            Err(DataError::RetroactiveWrite { .. })
        ));

        dm.ingest(MarketSnapshot::flat("SPY", day(5), 5.0)).unwrap();
        assert_eq!(dm.latest_close("SPY", AsOf::new(day(5))).unwrap(), 5.0);
    }

    #[test]
    fn extending_prefetch_after_a_read_only_adds_later_sessions() {
        let days: Vec<NaiveDate> = (1..=10).map(day).collect();
        let closes: Vec<f64> = (1..=10).map(|i| 100.0 + i as f64).collect();
        let source = InMemorySource::from_closes("SPY", &days, &closes);
        let symbols = ["SPY".to_string()];
        let dm = DataManager::new(0);
        dm.prefetch(&source, &symbols, day(1), day(5)).unwrap();
        dm.get_series("SPY", &SeriesField::Close, 2, AsOf::new(day(5))).unwrap();

        let summary = dm.prefetch(&source, &symbols, day(1), day(10)).unwrap();
        assert_eq!(summary.snapshots, 5);
        assert_eq!(dm.latest_close("SPY", AsOf::new(day(10))).unwrap(), 110.0);
        assert_eq!(dm.served_cutoff("SPY"), Some(day(10)));
    }

    #[test]
    fn lookup_before_load_does_not_block_loading() {
        let dm = loaded(0);
        assert!(dm.latest("QQQ", AsOf::new(day(5))).is_err());
        assert!(dm
            .get_series("QQQ", &SeriesField::Close, 1, AsOf::new(day(5)))
            .is_err());
        assert_eq!(dm.served_cutoff("QQQ"), None);

        let days: Vec<NaiveDate> = (1..=10).map(day).collect();
        let source = InMemorySource::from_closes("QQQ", &days, &[50.0; 10]);
        dm.prefetch(&source, &["QQQ".to_string()], day(1), day(10)).unwrap();
        assert_eq!(dm.latest_close("QQQ", AsOf::new(day(5))).unwrap(), 50.0);
    }

    #[test]
    fn answers_at_a_cutoff_survive_later_ingest() {
        let dm = loaded(0);
        let at = AsOf::new(day(7));
        let closes = dm.get_series("SPY", &SeriesField::Close, 3, at).unwrap();
        let volumes = dm.get_series("SPY", &SeriesField::Volume, 4, at).unwrap();
        let stamps = |snaps: Vec<MarketSnapshot>| -> Vec<(NaiveDate, f64)> {
            snaps.iter().map(|s| (s.timestamp, s.close)).collect()
        };
        let snaps = stamps(dm.visible_snapshots("SPY", 5, at).unwrap());

        dm.ingest(MarketSnapshot::flat("SPY", day(11), 500.0)).unwrap();

        assert_eq!(dm.get_series("SPY", &SeriesField::Close, 3, at).unwrap(), closes);
        assert_eq!(dm.get_series("SPY", &SeriesField::Volume, 4, at).unwrap(), volumes);
        assert_eq!(
            &*dm.get_series("SPY", &SeriesField::Close, 5, at).unwrap(),
            &[103.0, 104.0, 105.0, 106.0, 107.0]
        );
        assert_eq!(stamps(dm.visible_snapshots("SPY", 5, at).unwrap()), snaps);
        assert_eq!(dm.latest_close("SPY", at).unwrap(), 107.0);
    }

    #[test]
    fn concurrent_reads_and_ingests_keep_served_answers_stable() {
        let dm = loaded(0);
        let at = AsOf::new(day(10));
        let baseline = dm.get_series("SPY", &SeriesField::Close, 5, at).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for d in 11..=31 {
                    dm.ingest(MarketSnapshot::flat("SPY", day(d), 200.0 + d as f64))
                        .unwrap();
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    for window in 1..=5 {
                        let closes = dm.get_series("SPY", &SeriesField::Close, window, at).unwrap();
                        assert_eq!(&*closes, &baseline[5 - window..]);
                        assert_eq!(dm.latest_close("SPY", at).unwrap(), 110.0);
                    }
                });
            }
        });
        assert_eq!(dm.latest_close("SPY", AsOf::new(day(31))).unwrap(), 231.0);
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let dm = loaded(0);
        assert!(matches!(
            dm.latest("QQQ", AsOf::new(day(5))),
            Err(DataError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn warmup_indicator_values_count_as_missing() {
        let dm = loaded(0);
        let err = dm
            .get_series("SPY", &SeriesField::indicator("sma_20"), 1, AsOf::new(day(10)))
            .unwrap_err();
        assert!(matches!(err, DataError::InsufficientHistory { .. }));
        let ok = dm
            .get_series("SPY", &SeriesField::indicator("return_1d"), 3, AsOf::new(day(10)))
            .unwrap();
        assert_eq!(ok.len(), 3);
    }
}
