//! PortfolioState: aggregate state of cash + all open positions.

use super::position::Position;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the equity history, recorded once per simulated step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub cash: f64,
    pub equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

/// Aggregate portfolio state. A single instance exists per run and every
/// mutation goes through the `PositionManager`.
///
/// The accounting identity must hold at every step:
/// `equity == cash + sum(position market values)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub initial_capital: f64,
    /// Ordered by symbol so iteration (and therefore equity summation) is
    /// deterministic.
    pub positions: BTreeMap<String, Position>,
    pub realized_pnl: f64,
    pub total_commission: f64,
    pub equity_history: Vec<EquityPoint>,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            realized_pnl: 0.0,
            total_commission: 0.0,
            equity_history: Vec::new(),
        }
    }

    /// Sum of position market values at their last marks.
    pub fn positions_value(&self) -> f64 {
        self.positions.values().map(Position::market_value).sum()
    }

    /// Total equity = cash + sum of all position market values.
    pub fn equity(&self) -> f64 {
        self.cash + self.positions_value()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(Position::unrealized_pnl).sum()
    }

    /// Whether a symbol has an open position.
    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.get(symbol).is_some_and(|p| !p.is_flat())
    }

    /// Get a position by symbol (if exists and not flat).
    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol).filter(|p| !p.is_flat())
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.values().filter(|p| !p.is_flat()).count()
    }

    /// Read-only copy handed to agents and the risk sizer.
    pub fn snapshot(&self, as_of: NaiveDate) -> PortfolioSnapshot {
        PortfolioSnapshot {
            as_of,
            cash: self.cash,
            equity: self.equity(),
            positions: self.positions.clone(),
        }
    }
}

/// Immutable view of the portfolio at the start of a decision step.
///
/// Symbol pipelines within one step all see the same snapshot; orders are
/// applied afterwards at a single serialization point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub as_of: NaiveDate,
    pub cash: f64,
    pub equity: f64,
    pub positions: BTreeMap<String, Position>,
}

impl PortfolioSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol).filter(|p| !p.is_flat())
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.values().filter(|p| !p.is_flat()).count()
    }
}
