//! Deterministic synthetic price paths for development and tests.
//!
//! The same `(seed, symbol)` always yields the same series, so runs over
//! synthetic data remain reproducible and their run ids stay meaningful.

use super::provider::{DataError, DataSource};
use crate::domain::MarketSnapshot;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    seed: u64,
    start_price: f64,
    daily_range: f64,
}

impl SyntheticSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start_price: 100.0,
            daily_range: 0.03,
        }
    }

    pub fn with_start_price(mut self, price: f64) -> Self {
        self.start_price = price;
        self
    }

    /// Maximum absolute daily return (uniformly drawn).
    pub fn with_daily_range(mut self, range: f64) -> Self {
        self.daily_range = range.abs();
        self
    }

    fn rng_for(&self, symbol: &str) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(symbol.as_bytes());
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }
}

impl DataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarketSnapshot>, DataError> {
        let mut rng = self.rng_for(symbol);
        let mut snapshots = Vec::new();
        let mut price = self.start_price;
        let mut current = start;

        while current <= end {
            if matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                current += chrono::Duration::days(1);
                continue;
            }

            let daily_return: f64 = if self.daily_range > 0.0 {
                rng.gen_range(-self.daily_range..self.daily_range)
            } else {
                0.0
            };
            let open = price;
            let close = price * (1.0 + daily_return);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(500_000..5_000_000u64);

            snapshots.push(MarketSnapshot::new(symbol, current, open, high, low, close, volume));

            price = close;
            current += chrono::Duration::days(1);
        }

        Ok(snapshots)
    }
}
