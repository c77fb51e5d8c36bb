//! Pure sizing of final decisions against portfolio limits.
//!
//! `RiskManager::size` is a function of its inputs only: the same decision,
//! portfolio snapshot and price always produce the same order or rejection.

use crate::domain::{Action, DecisionId, OrderSide, PortfolioSnapshot};
use crate::orchestrator::DecisionContext;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections. The engine converts every one of these into HOLD.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskLimitExceeded {
    #[error("{open} positions open, limit is {limit}")]
    MaxOpenPositions { open: usize, limit: usize },

    #[error("confidence {confidence:.2} below minimum {min:.2}")]
    BelowMinConfidence { confidence: f64, min: f64 },

    #[error("short selling disabled for {symbol}")]
    ShortingDisabled { symbol: String },

    #[error("order for {symbol} rounds to zero shares")]
    ZeroSize { symbol: String },

    #[error("equity {equity:.2} leaves no room for new risk")]
    NonPositiveEquity { equity: f64 },

    #[error("no usable price for {symbol}: {price}")]
    InvalidPrice { symbol: String, price: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Largest position value as a fraction of equity.
    pub max_position_fraction: f64,
    pub max_open_positions: usize,
    pub allow_short: bool,
    /// Entries below this confidence are rejected.
    pub min_confidence: f64,
    /// Multiply the requested fraction by the decision's confidence.
    pub confidence_scaling: bool,
    pub default_stop_loss_pct: Option<f64>,
    pub default_take_profit_pct: Option<f64>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_fraction: 0.2,
            max_open_positions: 5,
            allow_short: false,
            min_confidence: 0.0,
            confidence_scaling: false,
            default_stop_loss_pct: Some(0.08),
            default_take_profit_pct: Some(0.20),
        }
    }
}

/// The slice of a final decision that sizing looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingRequest {
    pub decision_id: Option<DecisionId>,
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub size_fraction: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
}

impl From<&DecisionContext> for SizingRequest {
    fn from(ctx: &DecisionContext) -> Self {
        let d = ctx.decision();
        Self {
            decision_id: Some(ctx.id()),
            symbol: ctx.symbol().to_string(),
            action: d.action,
            confidence: d.confidence,
            size_fraction: d.size_fraction,
            stop_loss_pct: d.stop_loss_pct,
            take_profit_pct: d.take_profit_pct,
        }
    }
}

/// An order the position manager can apply as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedOrder {
    pub decision_id: Option<DecisionId>,
    pub symbol: String,
    pub side: OrderSide,
    /// Whole shares, always positive.
    pub quantity: f64,
    pub reference_price: f64,
    /// Resulting position value as a fraction of equity (entries only).
    pub size_fraction: f64,
    /// Reduces or closes an existing position instead of adding risk.
    pub reduces_position: bool,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Bound `request` against the portfolio. `Ok(None)` means nothing to do.
    pub fn size(
        &self,
        request: &SizingRequest,
        portfolio: &PortfolioSnapshot,
        price: f64,
    ) -> Result<Option<BoundedOrder>, RiskLimitExceeded> {
        if request.action.is_hold() {
            return Ok(None);
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(RiskLimitExceeded::InvalidPrice {
                symbol: request.symbol.clone(),
                price,
            });
        }

        let held = portfolio.position(&request.symbol).map(|p| p.quantity);
        match (request.action, held) {
            (Action::Sell, Some(q)) if q > 0.0 => Ok(self.reduce(request, q, price)),
            (Action::Buy, Some(q)) if q < 0.0 => Ok(self.reduce(request, q, price)),
            (Action::Sell, None) if !self.limits.allow_short => Ok(None),
            (Action::Sell, _) if !self.limits.allow_short => Err(RiskLimitExceeded::ShortingDisabled {
                symbol: request.symbol.clone(),
            }),
            (action, held) => self.enter(request, action, held.unwrap_or(0.0), portfolio, price),
        }
    }

    /// Close `size_fraction` of an existing position; a fraction of zero or
    /// at least one closes it fully.
    fn reduce(&self, request: &SizingRequest, held: f64, price: f64) -> Option<BoundedOrder> {
        let open = held.abs();
        let fraction = request.size_fraction;
        let quantity = if fraction <= 0.0 || fraction >= 1.0 || !fraction.is_finite() {
            open
        } else {
            (open * fraction).floor().max(1.0).min(open)
        };
        if quantity <= 0.0 {
            return None;
        }
        Some(BoundedOrder {
            decision_id: request.decision_id,
            symbol: request.symbol.clone(),
            side: if held > 0.0 { OrderSide::Sell } else { OrderSide::Buy },
            quantity,
            reference_price: price,
            size_fraction: 0.0,
            reduces_position: true,
            stop_loss: None,
            take_profit: None,
        })
    }

    /// Open or add to a position in the direction of `action`.
    fn enter(
        &self,
        request: &SizingRequest,
        action: Action,
        held: f64,
        portfolio: &PortfolioSnapshot,
        price: f64,
    ) -> Result<Option<BoundedOrder>, RiskLimitExceeded> {
        let limits = &self.limits;
        if request.confidence < limits.min_confidence {
            return Err(RiskLimitExceeded::BelowMinConfidence {
                confidence: request.confidence,
                min: limits.min_confidence,
            });
        }
        if held == 0.0 && portfolio.open_position_count() >= limits.max_open_positions {
            return Err(RiskLimitExceeded::MaxOpenPositions {
                open: portfolio.open_position_count(),
                limit: limits.max_open_positions,
            });
        }
        let equity = portfolio.equity;
        if !equity.is_finite() || equity <= 0.0 {
            return Err(RiskLimitExceeded::NonPositiveEquity { equity });
        }

        let requested = if request.size_fraction.is_finite() {
            request.size_fraction
        } else {
            0.0
        };
        let mut fraction = requested.clamp(0.0, limits.max_position_fraction.max(0.0));
        if limits.confidence_scaling {
            fraction *= request.confidence.clamp(0.0, 1.0);
        }

        let current_value = held.abs() * price;
        let mut notional = (fraction * equity - current_value).max(0.0);
        if action == Action::Buy {
            notional = notional.min(portfolio.cash.max(0.0));
        }
        if held != 0.0 && notional < price {
            // already at or above target
            return Ok(None);
        }

        let quantity = (notional / price).floor();
        if quantity < 1.0 {
            return Err(RiskLimitExceeded::ZeroSize {
                symbol: request.symbol.clone(),
            });
        }

        let side = if action == Action::Buy { OrderSide::Buy } else { OrderSide::Sell };
        let stop_pct = request
            .stop_loss_pct
            .filter(|p| *p > 0.0 && p.is_finite())
            .or(limits.default_stop_loss_pct);
        let target_pct = request
            .take_profit_pct
            .filter(|p| *p > 0.0 && p.is_finite())
            .or(limits.default_take_profit_pct);
        let sign = side.sign();

        Ok(Some(BoundedOrder {
            decision_id: request.decision_id,
            symbol: request.symbol.clone(),
            side,
            quantity,
            reference_price: price,
            size_fraction: (current_value + quantity * price) / equity,
            reduces_position: false,
            stop_loss: stop_pct.map(|p| price * (1.0 - sign * p)),
            take_profit: target_pct.map(|p| price * (1.0 + sign * p)),
        }))
    }
}
