//! Position keeping: fills, mark-to-market, stop exits and the equity
//! reconciliation check.
//!
//! Equity is tracked twice: directly (`cash + Σ quantity × mark`) and
//! incrementally from every fill and mark. The two must agree after every
//! mutation; disagreement is a fatal `PositionError::Reconciliation`.

pub mod fill_model;

pub use fill_model::FillModel;

use crate::domain::{
    ClosedTrade, DecisionId, EquityPoint, ExitReason, Fill, FillId, FillReason, OrderSide,
    PortfolioSnapshot, PortfolioState, Position,
};
use crate::risk::BoundedOrder;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

const RECONCILE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error(
        "equity reconciliation failed on {date}: cash {cash:.6} + positions {positions_value:.6} != tracked {tracked:.6}"
    )]
    Reconciliation {
        date: NaiveDate,
        cash: f64,
        positions_value: f64,
        tracked: f64,
    },

    #[error("invalid order for {symbol}: {reason}")]
    InvalidOrder { symbol: String, reason: String },
}

impl PositionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PositionError::Reconciliation { .. })
    }
}

/// Result of applying one order.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub fill: Fill,
    pub closed: Option<ClosedTrade>,
}

struct Execution<'a> {
    symbol: &'a str,
    side: OrderSide,
    quantity: f64,
    reference_price: f64,
    date: NaiveDate,
    decision_id: Option<DecisionId>,
    reason: FillReason,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PositionManager {
    state: PortfolioState,
    fill_model: FillModel,
    tracked_equity: f64,
    fills: Vec<Fill>,
    closed: Vec<ClosedTrade>,
    next_fill: u64,
}

impl PositionManager {
    pub fn new(initial_capital: f64, fill_model: FillModel) -> Self {
        Self {
            state: PortfolioState::new(initial_capital),
            fill_model,
            tracked_equity: initial_capital,
            fills: Vec::new(),
            closed: Vec::new(),
            next_fill: 1,
        }
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn into_state(self) -> PortfolioState {
        self.state
    }

    pub fn snapshot(&self, as_of: NaiveDate) -> PortfolioSnapshot {
        self.state.snapshot(as_of)
    }

    pub fn tracked_equity(&self) -> f64 {
        self.tracked_equity
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    /// Apply an accepted order at its reference price (plus slippage).
    pub fn apply(&mut self, order: &BoundedOrder, date: NaiveDate) -> Result<ApplyOutcome, PositionError> {
        if !(order.quantity.is_finite() && order.quantity > 0.0) {
            return Err(PositionError::InvalidOrder {
                symbol: order.symbol.clone(),
                reason: format!("quantity {}", order.quantity),
            });
        }
        if !(order.reference_price.is_finite() && order.reference_price > 0.0) {
            return Err(PositionError::InvalidOrder {
                symbol: order.symbol.clone(),
                reason: format!("reference price {}", order.reference_price),
            });
        }

        let outcome = self.execute(Execution {
            symbol: &order.symbol,
            side: order.side,
            quantity: order.quantity,
            reference_price: order.reference_price,
            date,
            decision_id: order.decision_id,
            reason: FillReason::Decision,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
        })?;
        self.reconcile(date)?;
        Ok(outcome)
    }

    /// Re-mark every open position and close those whose stop-loss or
    /// take-profit the new price breaches. Symbols missing from `prices`
    /// keep their last mark.
    pub fn mark_to_market(
        &mut self,
        prices: &BTreeMap<String, f64>,
        date: NaiveDate,
    ) -> Result<Vec<ClosedTrade>, PositionError> {
        let mut exits = Vec::new();
        for (symbol, position) in self.state.positions.iter_mut() {
            let Some(&price) = prices.get(symbol).filter(|p| p.is_finite() && **p > 0.0) else {
                continue;
            };
            self.tracked_equity += position.quantity * (price - position.mark_price);
            position.mark_price = price;
            if date > position.entry_time {
                position.sessions_held += 1;
            }

            if position.stop_breached(price) {
                exits.push((symbol.clone(), FillReason::StopLoss, price));
            } else if position.target_reached(price) {
                exits.push((symbol.clone(), FillReason::TakeProfit, price));
            }
        }
        self.reconcile(date)?;

        let mut closed = Vec::with_capacity(exits.len());
        for (symbol, reason, price) in exits {
            let Some(quantity) = self.state.positions.get(&symbol).map(|p| p.quantity) else {
                continue;
            };
            info!(symbol = %symbol, date = %date, ?reason, price, "protective exit");
            let outcome = self.execute(Execution {
                symbol: &symbol,
                side: if quantity > 0.0 { OrderSide::Sell } else { OrderSide::Buy },
                quantity: quantity.abs(),
                reference_price: price,
                date,
                decision_id: None,
                reason,
                stop_loss: None,
                take_profit: None,
            })?;
            closed.extend(outcome.closed);
        }
        self.reconcile(date)?;
        Ok(closed)
    }

    /// Append today's equity point.
    pub fn record_equity(&mut self, date: NaiveDate) -> EquityPoint {
        let point = EquityPoint {
            date,
            cash: self.state.cash,
            equity: self.state.equity(),
            realized_pnl: self.state.realized_pnl,
            unrealized_pnl: self.state.unrealized_pnl(),
        };
        self.state.equity_history.push(point.clone());
        point
    }

    /// Check `cash + Σ position market value == tracked equity`.
    pub fn reconcile(&self, date: NaiveDate) -> Result<(), PositionError> {
        let positions_value = self.state.positions_value();
        let direct = self.state.cash + positions_value;
        let tolerance = RECONCILE_TOLERANCE * self.tracked_equity.abs().max(1.0);
        if (direct - self.tracked_equity).abs() > tolerance || !direct.is_finite() {
            return Err(PositionError::Reconciliation {
                date,
                cash: self.state.cash,
                positions_value,
                tracked: self.tracked_equity,
            });
        }
        Ok(())
    }

    fn execute(&mut self, exec: Execution<'_>) -> Result<ApplyOutcome, PositionError> {
        let fill_price = self.fill_model.fill_price(exec.side, exec.reference_price);
        let commission = self.fill_model.commission();
        let delta = exec.side.sign() * exec.quantity;
        let held = self.state.positions.get(exec.symbol).map_or(0.0, |p| p.quantity);
        let old_mark = self
            .state
            .positions
            .get(exec.symbol)
            .map_or(exec.reference_price, |p| p.mark_price);

        let reduces = held != 0.0 && held.signum() != delta.signum();
        if reduces && exec.quantity > held.abs() + 1e-9 {
            return Err(PositionError::InvalidOrder {
                symbol: exec.symbol.to_string(),
                reason: format!("{} of {} would flip the position", exec.quantity, held),
            });
        }

        // incremental equity path, independent of the position bookkeeping below
        self.tracked_equity +=
            held * (exec.reference_price - old_mark) + delta * (exec.reference_price - fill_price) - commission;
        self.state.cash -= delta * fill_price + commission;
        self.state.total_commission += commission;

        let fill = Fill {
            id: FillId(self.next_fill),
            decision_id: exec.decision_id,
            timestamp: exec.date,
            symbol: exec.symbol.to_string(),
            side: exec.side,
            price: fill_price,
            reference_price: exec.reference_price,
            quantity: exec.quantity,
            commission,
            reason: exec.reason,
        };
        self.next_fill += 1;

        let closed = if reduces {
            self.reduce(&exec, fill_price, commission)
        } else {
            self.increase(&exec, fill_price, commission);
            None
        };

        debug!(
            symbol = exec.symbol,
            date = %exec.date,
            side = ?exec.side,
            quantity = exec.quantity,
            price = fill_price,
            "fill applied"
        );
        self.fills.push(fill.clone());
        if let Some(trade) = &closed {
            self.closed.push(trade.clone());
        }
        Ok(ApplyOutcome { fill, closed })
    }

    fn increase(&mut self, exec: &Execution<'_>, fill_price: f64, commission: f64) {
        let delta = exec.side.sign() * exec.quantity;
        let position = self
            .state
            .positions
            .entry(exec.symbol.to_string())
            .or_insert_with(|| {
                let mut p = Position::open(exec.symbol, 0.0, fill_price, exec.date);
                p.opened_by = exec.decision_id;
                p
            });

        let old_size = position.quantity.abs();
        let new_size = old_size + exec.quantity;
        position.entry_price = (position.entry_price * old_size + fill_price * exec.quantity) / new_size;
        position.quantity += delta;
        position.mark_price = exec.reference_price;
        position.entry_commission += commission;
        if exec.stop_loss.is_some() {
            position.stop_loss = exec.stop_loss;
        }
        if exec.take_profit.is_some() {
            position.take_profit = exec.take_profit;
        }
    }

    fn reduce(&mut self, exec: &Execution<'_>, fill_price: f64, commission: f64) -> Option<ClosedTrade> {
        let position = self.state.positions.get_mut(exec.symbol)?;
        let open = position.quantity.abs();
        let direction = position.quantity.signum();
        let share = exec.quantity / open;
        let entry_commission = position.entry_commission * share;

        let gross_pnl = direction * (fill_price - position.entry_price) * exec.quantity;
        let total_commission = entry_commission + commission;
        let net_pnl = gross_pnl - total_commission;
        self.state.realized_pnl += net_pnl;

        let trade = ClosedTrade {
            symbol: exec.symbol.to_string(),
            side: position.side(),
            entry_date: position.entry_time,
            entry_price: position.entry_price,
            entry_decision: position.opened_by,
            exit_date: exec.date,
            exit_price: fill_price,
            exit_decision: exec.decision_id,
            exit_reason: match exec.reason {
                FillReason::Decision => ExitReason::Decision,
                FillReason::StopLoss => ExitReason::StopLoss,
                FillReason::TakeProfit => ExitReason::TakeProfit,
            },
            quantity: exec.quantity,
            gross_pnl,
            commission: total_commission,
            net_pnl,
            sessions_held: position.sessions_held,
        };

        position.quantity += exec.side.sign() * exec.quantity;
        position.mark_price = exec.reference_price;
        position.entry_commission -= entry_commission;
        if position.is_flat() {
            self.state.positions.remove(exec.symbol);
        }
        Some(trade)
    }
}
