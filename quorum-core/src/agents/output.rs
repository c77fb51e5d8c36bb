//! Typed agent outputs, one variant per role family.

use super::error::AgentError;
use super::role::AgentRole;
use crate::domain::Action;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Phase-1 analyst output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystReport {
    pub role: AgentRole,
    pub stance: Action,
    pub confidence: f64,
    pub summary: String,
    /// Latest observation date the report relied on. Must not be later than
    /// the visible cutoff of the step that requested it.
    pub data_through: Option<NaiveDate>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// One speaker's contribution to a debate round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateTurn {
    pub role: AgentRole,
    pub round: usize,
    pub stance: Action,
    pub confidence: f64,
    pub argument: String,
    /// Speaker signals that it accepts the debate is settled.
    #[serde(default)]
    pub concede: bool,
    /// Size (fraction of equity) a risk debator argues for.
    #[serde(default)]
    pub size_fraction: Option<f64>,
}

impl DebateTurn {
    /// Placeholder turn recorded when a debater fails or times out.
    pub fn empty(role: AgentRole, round: usize) -> Self {
        Self {
            role,
            round,
            stance: Action::Hold,
            confidence: 0.0,
            argument: String::new(),
            concede: false,
            size_fraction: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.argument.is_empty() && self.confidence == 0.0
    }
}

/// Research manager verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPlan {
    pub action: Action,
    pub confidence: f64,
    pub rationale: String,
}

/// Trader proposal: direction plus rough size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub action: Action,
    pub size_fraction: f64,
    pub confidence: f64,
    pub rationale: String,
}

impl TradeProposal {
    pub fn hold(rationale: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            size_fraction: 0.0,
            confidence: 0.0,
            rationale: rationale.into(),
        }
    }
}

/// Risk manager output: the bounded final decision before portfolio sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub action: Action,
    pub confidence: f64,
    pub size_fraction: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub rationale: String,
}

impl RiskDecision {
    pub fn hold(rationale: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            size_fraction: 0.0,
            stop_loss_pct: None,
            take_profit_pct: None,
            rationale: rationale.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutput {
    Report(AnalystReport),
    Turn(DebateTurn),
    Plan(InvestmentPlan),
    Proposal(TradeProposal),
    Decision(RiskDecision),
}

impl AgentOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentOutput::Report(_) => "report",
            AgentOutput::Turn(_) => "turn",
            AgentOutput::Plan(_) => "plan",
            AgentOutput::Proposal(_) => "proposal",
            AgentOutput::Decision(_) => "decision",
        }
    }

    pub fn into_report(self, role: AgentRole) -> Result<AnalystReport, AgentError> {
        match self {
            AgentOutput::Report(r) => Ok(r),
            other => Err(AgentError::unexpected(role, "report", &other)),
        }
    }

    pub fn into_turn(self, role: AgentRole) -> Result<DebateTurn, AgentError> {
        match self {
            AgentOutput::Turn(t) => Ok(t),
            other => Err(AgentError::unexpected(role, "turn", &other)),
        }
    }

    pub fn into_plan(self, role: AgentRole) -> Result<InvestmentPlan, AgentError> {
        match self {
            AgentOutput::Plan(p) => Ok(p),
            other => Err(AgentError::unexpected(role, "plan", &other)),
        }
    }

    pub fn into_proposal(self, role: AgentRole) -> Result<TradeProposal, AgentError> {
        match self {
            AgentOutput::Proposal(p) => Ok(p),
            other => Err(AgentError::unexpected(role, "proposal", &other)),
        }
    }

    pub fn into_decision(self, role: AgentRole) -> Result<RiskDecision, AgentError> {
        match self {
            AgentOutput::Decision(d) => Ok(d),
            other => Err(AgentError::unexpected(role, "decision", &other)),
        }
    }
}
