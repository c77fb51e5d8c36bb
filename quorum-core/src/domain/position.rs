use crate::domain::ids::DecisionId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Long or short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// An open position. Owned by the `PositionManager` and mutated only by fills
/// and mark-to-market; removed from the portfolio on full close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed quantity: positive long, negative short.
    pub quantity: f64,
    /// Volume-weighted average entry price.
    pub entry_price: f64,
    pub entry_time: NaiveDate,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Last price the position was marked at.
    pub mark_price: f64,
    /// Sessions marked since entry.
    pub sessions_held: usize,
    /// Decision that opened the position.
    pub opened_by: Option<DecisionId>,
    /// Entry commission not yet charged against a closed trade.
    #[serde(default)]
    pub entry_commission: f64,
}

impl Position {
    pub fn open(
        symbol: impl Into<String>,
        quantity: f64,
        entry_price: f64,
        entry_time: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            entry_price,
            entry_time,
            stop_loss: None,
            take_profit: None,
            mark_price: entry_price,
            sessions_held: 0,
            opened_by: None,
            entry_commission: 0.0,
        }
    }

    pub fn side(&self) -> PositionSide {
        if self.quantity < 0.0 {
            PositionSide::Short
        } else {
            PositionSide::Long
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.abs() < 1e-9
    }

    /// Market value at the last mark (negative for shorts).
    pub fn market_value(&self) -> f64 {
        self.quantity * self.mark_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.quantity * (self.mark_price - self.entry_price)
    }

    /// Whether `price` breaches the stop-loss level for this side.
    pub fn stop_breached(&self, price: f64) -> bool {
        match (self.stop_loss, self.side()) {
            (Some(stop), PositionSide::Long) => price <= stop,
            (Some(stop), PositionSide::Short) => price >= stop,
            (None, _) => false,
        }
    }

    /// Whether `price` reaches the take-profit level for this side.
    pub fn target_reached(&self, price: f64) -> bool {
        match (self.take_profit, self.side()) {
            (Some(target), PositionSide::Long) => price >= target,
            (Some(target), PositionSide::Short) => price <= target,
            (None, _) => false,
        }
    }
}
