//! Execution cost model: adverse slippage in basis points plus a flat
//! commission per fill.

use crate::domain::OrderSide;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FillModel {
    /// Adverse slippage in basis points (5 = 0.05%).
    pub slippage_bps: f64,
    /// Flat commission charged on every fill.
    pub commission_per_trade: f64,
}

impl FillModel {
    pub fn new(slippage_bps: f64, commission_per_trade: f64) -> Self {
        Self {
            slippage_bps,
            commission_per_trade,
        }
    }

    /// Zero-cost fills at the reference price.
    pub fn frictionless() -> Self {
        Self::default()
    }

    /// Buys fill above the reference, sells below.
    pub fn fill_price(&self, side: OrderSide, reference: f64) -> f64 {
        reference * (1.0 + side.sign() * self.slippage_bps / 10_000.0)
    }

    pub fn commission(&self) -> f64 {
        self.commission_per_trade
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_is_adverse() {
        let model = FillModel::new(10.0, 1.0);
        assert!((model.fill_price(OrderSide::Buy, 100.0) - 100.1).abs() < 1e-9);
        assert!((model.fill_price(OrderSide::Sell, 100.0) - 99.9).abs() < 1e-9);
        assert_eq!(FillModel::frictionless().fill_price(OrderSide::Buy, 100.0), 100.0);
    }
}
