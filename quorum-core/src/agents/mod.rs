//! Agent capability, role registry and the shipped reasoning backends.

pub mod agent;
pub mod error;
pub mod heuristic;
pub mod output;
pub mod role;
pub mod scripted;
pub mod signal;
pub mod text;

pub use agent::{Agent, AgentRequest, AgentRoster};
pub use error::AgentError;
pub use heuristic::HeuristicAgent;
pub use output::{
    AgentOutput, AnalystReport, DebateTurn, InvestmentPlan, RiskDecision, TradeProposal,
};
pub use role::{AgentRole, ParseRoleError};
pub use scripted::{Script, ScriptedAgent};
pub use signal::extract_action;
pub use text::{TextAgent, TextBackend};
