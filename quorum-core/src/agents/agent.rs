//! The single capability every role is served through, and the roster that
//! maps roles to concrete backends.

use super::error::AgentError;
use super::output::{AgentOutput, AnalystReport, DebateTurn, InvestmentPlan, TradeProposal};
use super::role::AgentRole;
use crate::clock::AsOf;
use crate::data::DataView;
use crate::domain::{Action, PortfolioSnapshot};
use crate::memory::Lesson;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

static NO_REPORTS: BTreeMap<AgentRole, AnalystReport> = BTreeMap::new();

/// Everything an agent may look at for one call.
///
/// Market data is only reachable through `data`, which is pinned to the
/// step's `AsOf`; there is no way to read past the cutoff from here.
#[derive(Clone, Copy)]
pub struct AgentRequest<'a> {
    pub role: AgentRole,
    pub symbol: &'a str,
    pub data: DataView<'a>,
    pub portfolio: &'a PortfolioSnapshot,
    pub reports: &'a BTreeMap<AgentRole, AnalystReport>,
    /// Transcript of the debate in progress (investment or risk).
    pub debate: &'a [DebateTurn],
    pub round: usize,
    /// Debate lean after tie-breaking, given to the research manager.
    pub lean: Option<Action>,
    pub plan: Option<&'a InvestmentPlan>,
    pub proposal: Option<&'a TradeProposal>,
    pub lessons: &'a [Lesson],
}

impl<'a> AgentRequest<'a> {
    pub fn new(
        role: AgentRole,
        symbol: &'a str,
        data: DataView<'a>,
        portfolio: &'a PortfolioSnapshot,
    ) -> Self {
        Self {
            role,
            symbol,
            data,
            portfolio,
            reports: &NO_REPORTS,
            debate: &[],
            round: 0,
            lean: None,
            plan: None,
            proposal: None,
            lessons: &[],
        }
    }

    pub fn as_of(&self) -> AsOf {
        self.data.as_of()
    }

    pub fn with_reports(mut self, reports: &'a BTreeMap<AgentRole, AnalystReport>) -> Self {
        self.reports = reports;
        self
    }

    pub fn with_debate(mut self, debate: &'a [DebateTurn], round: usize) -> Self {
        self.debate = debate;
        self.round = round;
        self
    }

    pub fn with_lean(mut self, lean: Action) -> Self {
        self.lean = Some(lean);
        self
    }

    pub fn with_plan(mut self, plan: &'a InvestmentPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_proposal(mut self, proposal: &'a TradeProposal) -> Self {
        self.proposal = Some(proposal);
        self
    }

    pub fn with_lessons(mut self, lessons: &'a [Lesson]) -> Self {
        self.lessons = lessons;
        self
    }

    /// Most recent turn in the transcript by `role`.
    pub fn last_turn_by(&self, role: AgentRole) -> Option<&'a DebateTurn> {
        self.debate.iter().rev().find(|t| t.role == role)
    }
}

impl fmt::Debug for AgentRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRequest")
            .field("role", &self.role)
            .field("symbol", &self.symbol)
            .field("as_of", &self.data.as_of())
            .field("round", &self.round)
            .field("reports", &self.reports.len())
            .field("debate", &self.debate.len())
            .finish()
    }
}

/// A reasoning backend. Any implementation can stand in for any role; the
/// role is carried by the request.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn produce(&self, request: &AgentRequest<'_>) -> Result<AgentOutput, AgentError>;
}

/// Role → backend mapping for one run.
#[derive(Clone, Default)]
pub struct AgentRoster {
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
}

impl AgentRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every role with the same backend.
    pub fn uniform(agent: Arc<dyn Agent>) -> Self {
        let agents = AgentRole::ALL
            .into_iter()
            .map(|role| (role, Arc::clone(&agent)))
            .collect();
        Self { agents }
    }

    pub fn with(mut self, role: AgentRole, agent: Arc<dyn Agent>) -> Self {
        self.insert(role, agent);
        self
    }

    pub fn insert(&mut self, role: AgentRole, agent: Arc<dyn Agent>) {
        self.agents.insert(role, agent);
    }

    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn Agent>> {
        self.agents.get(&role).cloned()
    }

    /// Roles among `required` with no registered backend, in the given order.
    pub fn missing(&self, required: &[AgentRole]) -> Vec<AgentRole> {
        required
            .iter()
            .copied()
            .filter(|r| !self.agents.contains_key(r))
            .collect()
    }
}

impl fmt::Debug for AgentRoster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut roles: Vec<_> = self
            .agents
            .iter()
            .map(|(role, agent)| (*role, agent.name().to_string()))
            .collect();
        roles.sort();
        f.debug_struct("AgentRoster").field("agents", &roles).finish()
    }
}
