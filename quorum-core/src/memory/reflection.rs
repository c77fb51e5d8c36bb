//! Turns closed trades into scored lessons.

use super::store::{MemoryError, MemoryStore, NewMemory, OutcomeLabel};
use crate::agents::AgentRole;
use crate::clock::AsOf;
use crate::domain::{Action, ClosedTrade, MemoryId, PositionSide};
use crate::orchestrator::DecisionContext;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionSettings {
    /// Roles that receive one record per closed trade.
    pub roles: Vec<AgentRole>,
    /// Absolute return below which an outcome is `Neutral`.
    pub neutral_band: f64,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self {
            roles: AgentRole::DEFAULT_REFLECT.to_vec(),
            neutral_band: 0.005,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReflectionEngine {
    settings: ReflectionSettings,
}

impl ReflectionEngine {
    pub fn new(settings: ReflectionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ReflectionSettings {
        &self.settings
    }

    /// Score `trade` and append one record per configured role.
    ///
    /// `entry` is the decision that opened the position, if still known; it
    /// supplies each role's own call and the retrieval text. Fails with
    /// `FutureOutcome` if the trade closes after `as_of`.
    pub fn reflect(
        &self,
        trade: &ClosedTrade,
        entry: Option<&DecisionContext>,
        as_of: AsOf,
        store: &MemoryStore,
    ) -> Result<Vec<MemoryId>, MemoryError> {
        if trade.exit_date > as_of.date() {
            return Err(MemoryError::FutureOutcome {
                closed_at: trade.exit_date,
                as_of: as_of.date(),
            });
        }

        let realized = trade.return_pct();
        let outcome = OutcomeLabel::classify(realized, self.settings.neutral_band);
        let trade_dir = match trade.side {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        };
        let market_dir = match outcome {
            OutcomeLabel::Positive => trade_dir,
            OutcomeLabel::Negative => -trade_dir,
            OutcomeLabel::Neutral => 0.0,
        };
        let trade_action = if trade_dir > 0.0 { Action::Buy } else { Action::Sell };
        let situation = entry.map_or_else(
            || format!("{} {:?} position entered {}", trade.symbol, trade.side, trade.entry_date),
            DecisionContext::situation,
        );

        let mut ids = Vec::with_capacity(self.settings.roles.len());
        for &role in &self.settings.roles {
            let stance = entry
                .and_then(|ctx| ctx.stance_of(role))
                .unwrap_or(trade_action);
            let hit = stance.direction() == market_dir;
            let lesson = format!(
                "{role} called {stance} on {} ({} -> {}); the {:?} trade returned {:+.2}% ({}), so the call was {}.",
                trade.symbol,
                trade.entry_date,
                trade.exit_date,
                trade.side,
                realized * 100.0,
                label_str(outcome),
                if hit { "right" } else { "wrong" },
            );
            let id = store.append(NewMemory {
                role,
                symbol: trade.symbol.clone(),
                decided_at: trade.entry_date,
                closed_at: trade.exit_date,
                decision_id: trade.entry_decision,
                stance,
                situation: situation.clone(),
                lesson,
                realized_return: realized,
                outcome,
                hit,
            })?;
            ids.push(id);
        }

        debug!(
            symbol = %trade.symbol,
            date = %as_of,
            records = ids.len(),
            outcome = label_str(outcome),
            "reflected on closed trade"
        );
        Ok(ids)
    }
}

fn label_str(label: OutcomeLabel) -> &'static str {
    match label {
        OutcomeLabel::Positive => "positive",
        OutcomeLabel::Negative => "negative",
        OutcomeLabel::Neutral => "neutral",
    }
}
