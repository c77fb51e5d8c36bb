//! The audit record of one symbol's six-phase decision at one step.

use super::debate::Transcript;
use super::phase::Phase;
use crate::agents::{AgentRole, AnalystReport, InvestmentPlan, RiskDecision, TradeProposal};
use crate::domain::{Action, DecisionId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Classification of every degraded or failed step in the decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientHistory,
    AgentFailure,
    AgentTimeout,
    RiskLimitExceeded,
    SymbolStepFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::InsufficientHistory => "insufficient_history",
            FailureKind::AgentFailure => "agent_failure",
            FailureKind::AgentTimeout => "agent_timeout",
            FailureKind::RiskLimitExceeded => "risk_limit_exceeded",
            FailureKind::SymbolStepFailure => "symbol_step_failure",
        };
        f.write_str(s)
    }
}

/// One contribution that fell back to its degraded default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub phase: Phase,
    pub role: Option<AgentRole>,
    pub kind: FailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub action: Action,
    pub confidence: f64,
    /// Requested fraction of equity (entries) or of the position (exits).
    pub size_fraction: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub rationale: String,
    /// HOLD was imposed because no analyst produced a signal.
    pub forced_hold: bool,
}

impl FinalDecision {
    pub(crate) fn from_risk(decision: RiskDecision) -> Self {
        Self {
            action: decision.action,
            confidence: decision.confidence,
            size_fraction: decision.size_fraction,
            stop_loss_pct: decision.stop_loss_pct,
            take_profit_pct: decision.take_profit_pct,
            rationale: decision.rationale,
            forced_hold: false,
        }
    }

    pub(crate) fn forced_hold(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            size_fraction: 0.0,
            stop_loss_pct: None,
            take_profit_pct: None,
            rationale: reason.into(),
            forced_hold: true,
        }
    }
}

/// Complete, immutable record of one (symbol, step) decision. Only the
/// orchestrator constructs these, after phase 6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    id: DecisionId,
    symbol: String,
    timestamp: NaiveDate,
    cutoff: NaiveDate,
    reports: BTreeMap<AgentRole, AnalystReport>,
    investment_debate: Transcript,
    lean: Action,
    plan: InvestmentPlan,
    proposal: TradeProposal,
    risk_debate: Transcript,
    decision: FinalDecision,
    degradations: Vec<Degradation>,
}

pub(crate) struct ContextParts {
    pub id: DecisionId,
    pub symbol: String,
    pub timestamp: NaiveDate,
    pub cutoff: NaiveDate,
    pub reports: BTreeMap<AgentRole, AnalystReport>,
    pub investment_debate: Transcript,
    pub lean: Action,
    pub plan: InvestmentPlan,
    pub proposal: TradeProposal,
    pub risk_debate: Transcript,
    pub decision: FinalDecision,
    pub degradations: Vec<Degradation>,
}

impl DecisionContext {
    pub(crate) fn from_parts(parts: ContextParts) -> Self {
        Self {
            id: parts.id,
            symbol: parts.symbol,
            timestamp: parts.timestamp,
            cutoff: parts.cutoff,
            reports: parts.reports,
            investment_debate: parts.investment_debate,
            lean: parts.lean,
            plan: parts.plan,
            proposal: parts.proposal,
            risk_debate: parts.risk_debate,
            decision: parts.decision,
            degradations: parts.degradations,
        }
    }

    pub fn id(&self) -> DecisionId {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timestamp(&self) -> NaiveDate {
        self.timestamp
    }

    /// Latest data date visible to this decision.
    pub fn cutoff(&self) -> NaiveDate {
        self.cutoff
    }

    pub fn reports(&self) -> &BTreeMap<AgentRole, AnalystReport> {
        &self.reports
    }

    pub fn investment_debate(&self) -> &Transcript {
        &self.investment_debate
    }

    pub fn lean(&self) -> Action {
        self.lean
    }

    pub fn plan(&self) -> &InvestmentPlan {
        &self.plan
    }

    pub fn proposal(&self) -> &TradeProposal {
        &self.proposal
    }

    pub fn risk_debate(&self) -> &Transcript {
        &self.risk_debate
    }

    pub fn decision(&self) -> &FinalDecision {
        &self.decision
    }

    pub fn action(&self) -> Action {
        self.decision.action
    }

    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    /// What `role` argued for in this decision, if it contributed.
    pub fn stance_of(&self, role: AgentRole) -> Option<Action> {
        match role.phase() {
            Phase::Analysis => self.reports.get(&role).map(|r| r.stance),
            Phase::InvestmentDebate => self
                .investment_debate
                .last_by(role)
                .filter(|t| !t.is_empty())
                .map(|t| t.stance),
            Phase::ResearchManagement => Some(self.plan.action),
            Phase::Trading => Some(self.proposal.action),
            Phase::RiskDebate => self
                .risk_debate
                .last_by(role)
                .filter(|t| !t.is_empty())
                .map(|t| t.stance),
            Phase::RiskManagement => Some(self.decision.action),
        }
    }

    /// Retrieval text describing the market situation behind this decision.
    pub fn situation(&self) -> String {
        situation_text(&self.symbol, &self.reports)
    }
}

pub(crate) fn situation_text(symbol: &str, reports: &BTreeMap<AgentRole, AnalystReport>) -> String {
    if reports.is_empty() {
        return format!("{symbol}: no analyst signal");
    }
    let body: Vec<String> = reports
        .values()
        .map(|r| format!("{} {} {}", r.role, r.stance, r.summary))
        .collect();
    format!("{symbol}: {}", body.join("; "))
}
