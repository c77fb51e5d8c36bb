//! ClosedTrade: a realized (full or partial) position close.

use super::ids::DecisionId;
use super::position::PositionSide;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Why a position was (partially) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Decision,
    StopLoss,
    TakeProfit,
}

/// A realized close: entry → exit for `quantity` units.
///
/// Carries the opening and closing decision ids so reflection can find the
/// decision that is being scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    // ── Identification ──
    pub symbol: String,
    pub side: PositionSide,

    // ── Entry ──
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub entry_decision: Option<DecisionId>,

    // ── Exit ──
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_decision: Option<DecisionId>,
    pub exit_reason: ExitReason,

    // ── Size ──
    /// Unsigned quantity closed.
    pub quantity: f64,

    // ── PnL ──
    pub gross_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,

    pub sessions_held: usize,
}

impl ClosedTrade {
    /// Return on the trade as a fraction of entry cost.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 || self.quantity == 0.0 {
            return 0.0;
        }
        self.net_pnl / (self.entry_price * self.quantity)
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> ClosedTrade {
        ClosedTrade {
            symbol: "SPY".into(),
            side: PositionSide::Long,
            entry_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            entry_price: 100.0,
            entry_decision: Some(DecisionId(1)),
            exit_date: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
            exit_price: 110.0,
            exit_decision: Some(DecisionId(4)),
            exit_reason: ExitReason::Decision,
            quantity: 50.0,
            gross_pnl: 500.0,
            commission: 15.0,
            net_pnl: 485.0,
            sessions_held: 4,
        }
    }

    #[test]
    fn return_pct_calculation() {
        let trade = sample_trade();
        let expected = 485.0 / (100.0 * 50.0);
        assert!((trade.return_pct() - expected).abs() < 1e-10);
    }

    #[test]
    fn is_winner() {
        assert!(sample_trade().is_winner());
    }
}
