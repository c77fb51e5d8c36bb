//! Causal derived indicators attached to snapshots at prefetch time.
//!
//! Indicators are pure functions: snapshot history in, numeric series out.
//! The first `lookback()` values are `f64::NAN` (warmup).
//!
//! # Look-ahead contamination guard
//! No indicator value at session t may depend on data from session t+1 or
//! later. Recomputing over a longer series must leave every earlier value
//! unchanged, which is what lets `DataManager::ingest` append late data
//! without altering anything already served.

use crate::domain::MarketSnapshot;

pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "sma_20", "atr_14"). Used as the snapshot key.
    fn name(&self) -> &str;

    /// Number of sessions needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the entire series; output has the same length.
    fn compute(&self, snapshots: &[MarketSnapshot]) -> Vec<f64>;
}

/// The indicator set every prefetched snapshot carries.
pub fn default_indicators() -> Vec<Box<dyn Indicator>> {
    vec![
        Box::new(Sma::new(20)),
        Box::new(Sma::new(50)),
        Box::new(Ema::new(12)),
        Box::new(Ema::new(26)),
        Box::new(Rsi::new(14)),
        Box::new(Atr::new(14)),
        Box::new(DailyReturn),
    ]
}

/// Compute every indicator over `snapshots` and store the values on each one.
pub fn annotate(snapshots: &mut [MarketSnapshot], indicators: &[Box<dyn Indicator>]) {
    for indicator in indicators {
        let values = indicator.compute(snapshots);
        for (snap, value) in snapshots.iter_mut().zip(values) {
            snap.indicators.insert(indicator.name().to_string(), value);
        }
    }
}

/// Largest lookback across a set of indicators.
pub fn max_lookback(indicators: &[Box<dyn Indicator>]) -> usize {
    indicators.iter().map(|i| i.lookback()).max().unwrap_or(0)
}

/// Simple moving average of closes.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, snapshots: &[MarketSnapshot]) -> Vec<f64> {
        let n = snapshots.len();
        let mut result = vec![f64::NAN; n];
        if n < self.period {
            return result;
        }

        let mut sum: f64 = snapshots.iter().take(self.period).map(|s| s.close).sum();
        result[self.period - 1] = sum / self.period as f64;
        for i in self.period..n {
            sum += snapshots[i].close - snapshots[i - self.period].close;
            result[i] = sum / self.period as f64;
        }
        result
    }
}

/// Exponential moving average of closes, seeded with the SMA of the first window.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, snapshots: &[MarketSnapshot]) -> Vec<f64> {
        let n = snapshots.len();
        let mut result = vec![f64::NAN; n];
        if n < self.period {
            return result;
        }

        let alpha = 2.0 / (self.period as f64 + 1.0);
        let seed: f64 =
            snapshots.iter().take(self.period).map(|s| s.close).sum::<f64>() / self.period as f64;
        result[self.period - 1] = seed;

        let mut prev = seed;
        for i in self.period..n {
            let ema = alpha * snapshots[i].close + (1.0 - alpha) * prev;
            result[i] = ema;
            prev = ema;
        }
        result
    }
}

/// Wilder RSI over closes.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    name: String,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "RSI period must be >= 1");
        Self {
            period,
            name: format!("rsi_{period}"),
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, snapshots: &[MarketSnapshot]) -> Vec<f64> {
        let n = snapshots.len();
        let mut result = vec![f64::NAN; n];
        if n < self.period + 1 {
            return result;
        }

        let change = |i: usize| snapshots[i].close - snapshots[i - 1].close;

        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;
        for i in 1..=self.period {
            let ch = change(i);
            if ch > 0.0 {
                avg_gain += ch;
            } else {
                avg_loss -= ch;
            }
        }
        avg_gain /= self.period as f64;
        avg_loss /= self.period as f64;
        result[self.period] = rsi_value(avg_gain, avg_loss);

        let alpha = 1.0 / self.period as f64;
        for (i, slot) in result.iter_mut().enumerate().skip(self.period + 1) {
            let ch = change(i);
            avg_gain = alpha * ch.max(0.0) + (1.0 - alpha) * avg_gain;
            avg_loss = alpha * (-ch).max(0.0) + (1.0 - alpha) * avg_loss;
            *slot = rsi_value(avg_gain, avg_loss);
        }
        result
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // no movement
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Average true range with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

pub fn true_range(snapshots: &[MarketSnapshot]) -> Vec<f64> {
    snapshots
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if i == 0 {
                s.high - s.low
            } else {
                let pc = snapshots[i - 1].close;
                (s.high - s.low).max((s.high - pc).abs()).max((s.low - pc).abs())
            }
        })
        .collect()
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, snapshots: &[MarketSnapshot]) -> Vec<f64> {
        let n = snapshots.len();
        let mut result = vec![f64::NAN; n];
        if n < self.period {
            return result;
        }

        let tr = true_range(snapshots);
        let p = self.period as f64;
        let mut atr = tr.iter().take(self.period).sum::<f64>() / p;
        result[self.period - 1] = atr;
        for i in self.period..n {
            atr = (atr * (p - 1.0) + tr[i]) / p;
            result[i] = atr;
        }
        result
    }
}

/// Close-to-close simple return.
#[derive(Debug, Clone, Copy)]
pub struct DailyReturn;

impl Indicator for DailyReturn {
    fn name(&self) -> &str {
        "return_1d"
    }

    fn lookback(&self) -> usize {
        1
    }

    fn compute(&self, snapshots: &[MarketSnapshot]) -> Vec<f64> {
        let mut result = vec![f64::NAN; snapshots.len()];
        for i in 1..snapshots.len() {
            let prev = snapshots[i - 1].close;
            if prev > 0.0 {
                result[i] = snapshots[i].close / prev - 1.0;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(closes: &[f64]) -> Vec<MarketSnapshot> {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                MarketSnapshot::new("TEST", base + Duration::days(i as i64), c, c + 1.0, c - 1.0, c, 1_000)
            })
            .collect()
    }

    fn walk(n: usize) -> Vec<MarketSnapshot> {
        let closes: Vec<f64> = (0..n)
            .map(|i| 100.0 + ((i * 7919) % 23) as f64 - 11.0 + i as f64 * 0.1)
            .collect();
        series(&closes)
    }

    #[test]
    fn sma_matches_hand_computation() {
        let snaps = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = Sma::new(3).compute(&snaps);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(&out[2..], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn rsi_saturates_on_monotonic_rise() {
        let snaps = series(&(1..=20).map(|i| i as f64).collect::<Vec<_>>());
        let out = Rsi::new(14).compute(&snaps);
        assert_eq!(out[19], 100.0);
    }

    #[test]
    fn daily_return_is_close_to_close() {
        let snaps = series(&[100.0, 110.0, 99.0]);
        let out = DailyReturn.compute(&snaps);
        assert!(out[0].is_nan());
        assert!((out[1] - 0.1).abs() < 1e-12);
        assert!((out[2] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn no_indicator_reads_the_future() {
        let full = walk(120);
        for indicator in default_indicators() {
            let truncated = indicator.compute(&full[..60]);
            let complete = indicator.compute(&full);
            for i in 0..60 {
                let (t, f) = (truncated[i], complete[i]);
                assert!(
                    (t.is_nan() && f.is_nan()) || (t - f).abs() < 1e-10,
                    "{}: look-ahead contamination at {i}: {t} vs {f}",
                    indicator.name()
                );
            }
        }
    }

    #[test]
    fn annotate_writes_every_indicator() {
        let mut snaps = walk(60);
        let indicators = default_indicators();
        annotate(&mut snaps, &indicators);
        assert_eq!(snaps[59].indicators.len(), indicators.len());
        assert!(snaps[59].indicator("sma_50").is_some());
        assert!(snaps[0].indicator("sma_50").is_none());
        assert_eq!(max_lookback(&indicators), 49);
    }
}
