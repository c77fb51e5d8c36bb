use crate::domain::action::OrderSide;
use crate::domain::ids::{DecisionId, FillId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Why a fill happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillReason {
    /// An accepted orchestrator decision.
    Decision,
    StopLoss,
    TakeProfit,
}

/// Fill record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: FillId,
    pub decision_id: Option<DecisionId>,
    pub timestamp: NaiveDate,
    pub symbol: String,
    pub side: OrderSide,
    /// Executed price after slippage.
    pub price: f64,
    /// Reference price before slippage.
    pub reference_price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub reason: FillReason,
}

impl Fill {
    /// Signed quantity: positive for buys, negative for sells.
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity
    }

    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}
