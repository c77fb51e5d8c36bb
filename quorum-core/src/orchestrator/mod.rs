//! The six-phase decision protocol for one symbol at one step.
//!
//! Phase 1 fans the analysts out concurrently; every later phase is
//! sequential. Agent failures and timeouts degrade a single contribution
//! and are recorded on the context; only temporal-wall violations abort.

pub mod context;
pub mod debate;
pub mod phase;

pub use context::{DecisionContext, Degradation, FailureKind, FinalDecision};
pub use debate::{ConsensusPolicy, DebateSettings, TieBreak, Transcript};
pub use phase::{Phase, PhaseError, PhaseMachine};

use crate::agents::{
    AgentError, AgentOutput, AgentRequest, AgentRole, AgentRoster, DebateTurn, InvestmentPlan,
    RiskDecision, TradeProposal,
};
use crate::clock::AsOf;
use crate::data::{DataError, DataManager};
use crate::domain::{DecisionId, PortfolioSnapshot};
use crate::memory::{Lesson, MemoryStore};
use context::{situation_text, ContextParts};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum StepError {
    /// The step broke the temporal wall; the whole run is invalid.
    #[error("fatal: {0}")]
    Fatal(#[from] DataError),

    /// This symbol's step is lost; other symbols are unaffected.
    #[error("step failed for {symbol}: {reason}")]
    Symbol { symbol: String, reason: String },
}

impl StepError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Fatal(_))
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub analysts: Vec<AgentRole>,
    pub agent_timeout: Duration,
    pub debate: DebateSettings,
    /// Force HOLD when every analyst failed.
    pub hold_without_signal: bool,
    pub memory_top_k: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            analysts: AgentRole::ANALYSTS.to_vec(),
            agent_timeout: Duration::from_secs(30),
            debate: DebateSettings::default(),
            hold_without_signal: true,
            memory_top_k: 3,
        }
    }
}

/// Read-only inputs for one (symbol, step).
#[derive(Debug, Clone, Copy)]
pub struct StepInputs<'a> {
    pub decision_id: DecisionId,
    pub symbol: &'a str,
    pub as_of: AsOf,
    pub data: &'a DataManager,
    pub memory: &'a MemoryStore,
    pub portfolio: &'a PortfolioSnapshot,
}

#[derive(Debug, Clone)]
pub struct AgentOrchestrator {
    roster: AgentRoster,
    config: OrchestratorConfig,
}

impl AgentOrchestrator {
    pub fn new(roster: AgentRoster, config: OrchestratorConfig) -> Self {
        Self { roster, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    /// Roles this configuration will call.
    pub fn required_roles(&self) -> Vec<AgentRole> {
        let mut roles = self.config.analysts.clone();
        roles.extend(AgentRole::ALL.into_iter().filter(|r| !r.is_analyst()));
        roles
    }

    /// Run phases 1–6 and return the finished context.
    pub async fn run(&self, inputs: StepInputs<'_>) -> Result<DecisionContext, StepError> {
        let symbol = inputs.symbol;
        let date = inputs.as_of;
        let view = inputs.data.view(date);
        let cutoff = view.cutoff();
        let portfolio = inputs.portfolio;
        let debate = self.config.debate;
        let mut machine = PhaseMachine::new();
        let mut degradations = Vec::new();

        // ─── Phase 1: analysis ───
        self.enter(&mut machine, Phase::Analysis, symbol)?;
        let analyst_lessons: Vec<Vec<Lesson>> = self
            .config
            .analysts
            .iter()
            .map(|role| self.recall(&inputs, *role, symbol))
            .collect();
        let requests: Vec<AgentRequest<'_>> = self
            .config
            .analysts
            .iter()
            .zip(&analyst_lessons)
            .map(|(role, lessons)| {
                AgentRequest::new(*role, symbol, view, portfolio).with_lessons(lessons)
            })
            .collect();
        let results = join_all(requests.iter().map(|r| self.invoke(r))).await;

        let mut reports = BTreeMap::new();
        for (request, result) in requests.iter().zip(results) {
            let role = request.role;
            match result.and_then(|out| out.into_report(role)) {
                Ok(report) => {
                    if let Some(through) = report.data_through.filter(|d| *d > cutoff) {
                        error!(symbol, date = %date, role = %role, %through, %cutoff, "analyst report beyond visible cutoff");
                        return Err(StepError::Fatal(DataError::TemporalViolation {
                            symbol: symbol.to_string(),
                            observed: through,
                            cutoff,
                        }));
                    }
                    reports.insert(role, report);
                }
                Err(e) => self.absorb(&mut degradations, Phase::Analysis, role, e, symbol, date)?,
            }
        }
        debug!(symbol, date = %date, phase = %Phase::Analysis, reports = reports.len(), "phase complete");

        // ─── Phase 2: bull/bear debate ───
        self.enter(&mut machine, Phase::InvestmentDebate, symbol)?;
        let situation = situation_text(symbol, &reports);
        let bull_lessons = self.recall(&inputs, AgentRole::BullResearcher, &situation);
        let bear_lessons = self.recall(&inputs, AgentRole::BearResearcher, &situation);
        let mut investment = Transcript::default();
        for round in 0..debate.max_debate_rounds {
            for (role, lessons) in [
                (AgentRole::BullResearcher, &bull_lessons),
                (AgentRole::BearResearcher, &bear_lessons),
            ] {
                let request = AgentRequest::new(role, symbol, view, portfolio)
                    .with_reports(&reports)
                    .with_debate(&investment.turns, round)
                    .with_lessons(lessons);
                let turn = match self.invoke(&request).await.and_then(|o| o.into_turn(role)) {
                    Ok(turn) => turn,
                    Err(e) => {
                        self.absorb(&mut degradations, Phase::InvestmentDebate, role, e, symbol, date)?;
                        DebateTurn::empty(role, round)
                    }
                };
                investment.turns.push(turn);
            }
            investment.rounds = round + 1;

            let n = investment.turns.len();
            if debate
                .consensus
                .reached(&investment.turns[n - 2], &investment.turns[n - 1])
            {
                investment.consensus = true;
                debug!(symbol, date = %date, round = round + 1, "debate reached consensus");
                break;
            }
        }
        debug!(symbol, date = %date, phase = %Phase::InvestmentDebate, rounds = investment.rounds, "phase complete");

        // ─── Phase 3: research manager ───
        self.enter(&mut machine, Phase::ResearchManagement, symbol)?;
        let bull = investment.final_confidence(AgentRole::BullResearcher);
        let bear = investment.final_confidence(AgentRole::BearResearcher);
        let lean = debate.tie_break.verdict(bull, bear);
        let manager_lessons = self.recall(&inputs, AgentRole::ResearchManager, &situation);
        let request = AgentRequest::new(AgentRole::ResearchManager, symbol, view, portfolio)
            .with_reports(&reports)
            .with_debate(&investment.turns, investment.rounds)
            .with_lean(lean)
            .with_lessons(&manager_lessons);
        let plan = match self
            .invoke(&request)
            .await
            .and_then(|o| o.into_plan(AgentRole::ResearchManager))
        {
            Ok(plan) => plan,
            Err(e) => {
                self.absorb(&mut degradations, Phase::ResearchManagement, AgentRole::ResearchManager, e, symbol, date)?;
                InvestmentPlan {
                    action: lean,
                    confidence: bull.max(bear),
                    rationale: "research manager unavailable; using debate lean".into(),
                }
            }
        };
        debug!(symbol, date = %date, phase = %Phase::ResearchManagement, action = %plan.action, "phase complete");

        // ─── Phase 4: trader ───
        self.enter(&mut machine, Phase::Trading, symbol)?;
        let trader_lessons = self.recall(&inputs, AgentRole::Trader, &situation);
        let request = AgentRequest::new(AgentRole::Trader, symbol, view, portfolio)
            .with_reports(&reports)
            .with_plan(&plan)
            .with_lessons(&trader_lessons);
        let proposal = match self
            .invoke(&request)
            .await
            .and_then(|o| o.into_proposal(AgentRole::Trader))
        {
            Ok(proposal) => proposal,
            Err(e) => {
                self.absorb(&mut degradations, Phase::Trading, AgentRole::Trader, e, symbol, date)?;
                TradeProposal::hold("trader unavailable")
            }
        };
        debug!(symbol, date = %date, phase = %Phase::Trading, action = %proposal.action, "phase complete");

        // ─── Phase 5: risk debate ───
        self.enter(&mut machine, Phase::RiskDebate, symbol)?;
        let mut risk = Transcript::default();
        for round in 0..debate.max_risk_rounds {
            for role in AgentRole::RISK_DEBATORS {
                let request = AgentRequest::new(role, symbol, view, portfolio)
                    .with_reports(&reports)
                    .with_plan(&plan)
                    .with_proposal(&proposal)
                    .with_debate(&risk.turns, round);
                let turn = match self.invoke(&request).await.and_then(|o| o.into_turn(role)) {
                    Ok(turn) => turn,
                    Err(e) => {
                        self.absorb(&mut degradations, Phase::RiskDebate, role, e, symbol, date)?;
                        DebateTurn::empty(role, round)
                    }
                };
                risk.turns.push(turn);
            }
            risk.rounds = round + 1;
        }
        debug!(symbol, date = %date, phase = %Phase::RiskDebate, rounds = risk.rounds, "phase complete");

        // ─── Phase 6: risk manager ───
        self.enter(&mut machine, Phase::RiskManagement, symbol)?;
        let risk_lessons = self.recall(&inputs, AgentRole::RiskManager, &situation);
        let request = AgentRequest::new(AgentRole::RiskManager, symbol, view, portfolio)
            .with_reports(&reports)
            .with_plan(&plan)
            .with_proposal(&proposal)
            .with_debate(&risk.turns, risk.rounds)
            .with_lessons(&risk_lessons);
        let risk_decision = match self
            .invoke(&request)
            .await
            .and_then(|o| o.into_decision(AgentRole::RiskManager))
        {
            Ok(decision) => decision,
            Err(e) => {
                self.absorb(&mut degradations, Phase::RiskManagement, AgentRole::RiskManager, e, symbol, date)?;
                RiskDecision::hold("risk manager unavailable")
            }
        };

        let decision = if reports.is_empty() && self.config.hold_without_signal {
            if !risk_decision.action.is_hold() {
                warn!(symbol, date = %date, proposed = %risk_decision.action, "no analyst signal; forcing HOLD");
            }
            FinalDecision::forced_hold(format!(
                "no analyst signal; overrides {}: {}",
                risk_decision.action, risk_decision.rationale
            ))
        } else {
            FinalDecision::from_risk(risk_decision)
        };
        machine.finish().map_err(|e| StepError::Symbol {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;
        debug!(symbol, date = %date, phase = %Phase::RiskManagement, action = %decision.action, "decision complete");

        Ok(DecisionContext::from_parts(ContextParts {
            id: inputs.decision_id,
            symbol: symbol.to_string(),
            timestamp: date.date(),
            cutoff,
            reports,
            investment_debate: investment,
            lean,
            plan,
            proposal,
            risk_debate: risk,
            decision,
            degradations,
        }))
    }

    fn enter(&self, machine: &mut PhaseMachine, phase: Phase, symbol: &str) -> Result<(), StepError> {
        machine.enter(phase).map_err(|e| StepError::Symbol {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })
    }

    fn recall(&self, inputs: &StepInputs<'_>, role: AgentRole, query: &str) -> Vec<Lesson> {
        inputs
            .memory
            .recall_top(role, query, inputs.as_of, self.config.memory_top_k)
    }

    /// One agent call under the per-call timeout.
    async fn invoke(&self, request: &AgentRequest<'_>) -> Result<AgentOutput, AgentError> {
        let role = request.role;
        let agent = self.roster.get(role).ok_or(AgentError::MissingRole(role))?;
        match tokio::time::timeout(self.config.agent_timeout, agent.produce(request)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                role,
                timeout_ms: u64::try_from(self.config.agent_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Record a degraded contribution, or escalate if it broke the temporal wall.
    fn absorb(
        &self,
        degradations: &mut Vec<Degradation>,
        phase: Phase,
        role: AgentRole,
        error: AgentError,
        symbol: &str,
        date: AsOf,
    ) -> Result<(), StepError> {
        let error = match error {
            AgentError::Data(e) if e.is_fatal() => {
                error!(symbol, date = %date, phase = %phase, role = %role, error = %e, "fatal data error from agent");
                return Err(StepError::Fatal(e));
            }
            other => other,
        };
        let kind = error.failure_kind();
        warn!(symbol, date = %date, phase = %phase, role = %role, %kind, error = %error, "agent contribution degraded");
        degradations.push(Degradation {
            phase,
            role: Some(role),
            kind,
            detail: error.to_string(),
        });
        Ok(())
    }
}
