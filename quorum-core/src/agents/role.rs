//! Agent roles as data: each role names its phase and a default prompt
//! template. Every role is served through the same `Agent` capability.

use crate::orchestrator::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    MarketAnalyst,
    NewsAnalyst,
    SocialAnalyst,
    FundamentalsAnalyst,
    BullResearcher,
    BearResearcher,
    ResearchManager,
    Trader,
    AggressiveDebator,
    ConservativeDebator,
    NeutralDebator,
    RiskManager,
}

impl AgentRole {
    pub const ALL: [AgentRole; 12] = [
        AgentRole::MarketAnalyst,
        AgentRole::NewsAnalyst,
        AgentRole::SocialAnalyst,
        AgentRole::FundamentalsAnalyst,
        AgentRole::BullResearcher,
        AgentRole::BearResearcher,
        AgentRole::ResearchManager,
        AgentRole::Trader,
        AgentRole::AggressiveDebator,
        AgentRole::ConservativeDebator,
        AgentRole::NeutralDebator,
        AgentRole::RiskManager,
    ];

    pub const ANALYSTS: [AgentRole; 4] = [
        AgentRole::MarketAnalyst,
        AgentRole::NewsAnalyst,
        AgentRole::SocialAnalyst,
        AgentRole::FundamentalsAnalyst,
    ];

    /// Speaking order of the risk debate.
    pub const RISK_DEBATORS: [AgentRole; 3] = [
        AgentRole::AggressiveDebator,
        AgentRole::ConservativeDebator,
        AgentRole::NeutralDebator,
    ];

    /// Roles that receive a reflection record when a position closes.
    pub const DEFAULT_REFLECT: [AgentRole; 5] = [
        AgentRole::BullResearcher,
        AgentRole::BearResearcher,
        AgentRole::ResearchManager,
        AgentRole::Trader,
        AgentRole::RiskManager,
    ];

    pub fn phase(&self) -> Phase {
        match self {
            AgentRole::MarketAnalyst
            | AgentRole::NewsAnalyst
            | AgentRole::SocialAnalyst
            | AgentRole::FundamentalsAnalyst => Phase::Analysis,
            AgentRole::BullResearcher | AgentRole::BearResearcher => Phase::InvestmentDebate,
            AgentRole::ResearchManager => Phase::ResearchManagement,
            AgentRole::Trader => Phase::Trading,
            AgentRole::AggressiveDebator
            | AgentRole::ConservativeDebator
            | AgentRole::NeutralDebator => Phase::RiskDebate,
            AgentRole::RiskManager => Phase::RiskManagement,
        }
    }

    pub fn is_analyst(&self) -> bool {
        self.phase() == Phase::Analysis
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::MarketAnalyst => "market_analyst",
            AgentRole::NewsAnalyst => "news_analyst",
            AgentRole::SocialAnalyst => "social_analyst",
            AgentRole::FundamentalsAnalyst => "fundamentals_analyst",
            AgentRole::BullResearcher => "bull_researcher",
            AgentRole::BearResearcher => "bear_researcher",
            AgentRole::ResearchManager => "research_manager",
            AgentRole::Trader => "trader",
            AgentRole::AggressiveDebator => "aggressive_debator",
            AgentRole::ConservativeDebator => "conservative_debator",
            AgentRole::NeutralDebator => "neutral_debator",
            AgentRole::RiskManager => "risk_manager",
        }
    }

    /// Prompt template used by text backends. Placeholders in braces are
    /// substituted by `TextAgent`.
    pub fn default_template(&self) -> &'static str {
        match self {
            AgentRole::MarketAnalyst => {
                "You are a market analyst covering {symbol} on {date}. Using only the \
                 price and indicator history below (data through {cutoff}), describe the \
                 trend, momentum and volatility, then end with \
                 FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL** and CONFIDENCE: <0-1>.\n\n{market}"
            }
            AgentRole::NewsAnalyst => {
                "You are a news analyst covering {symbol} on {date}. Assess how recent \
                 price shocks in the history below (data through {cutoff}) reflect news \
                 flow. End with FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL** and \
                 CONFIDENCE: <0-1>.\n\n{market}"
            }
            AgentRole::SocialAnalyst => {
                "You are a sentiment analyst covering {symbol} on {date}. Judge crowd \
                 positioning from the volume and return history below (data through \
                 {cutoff}). End with FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL** and \
                 CONFIDENCE: <0-1>.\n\n{market}"
            }
            AgentRole::FundamentalsAnalyst => {
                "You are a fundamentals analyst covering {symbol} on {date}. Judge whether \
                 the price is stretched relative to its longer history below (data through \
                 {cutoff}). End with FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL** and \
                 CONFIDENCE: <0-1>.\n\n{market}"
            }
            AgentRole::BullResearcher => {
                "You are the bull researcher for {symbol}. Build the strongest case for \
                 buying from the analyst reports and rebut the bear.\n\nReports:\n{reports}\n\n\
                 Debate so far:\n{debate}\n\nPast lessons:\n{lessons}\n\nState CONFIDENCE: <0-1> \
                 and write CONSENSUS if you accept the other side's view."
            }
            AgentRole::BearResearcher => {
                "You are the bear researcher for {symbol}. Build the strongest case against \
                 buying from the analyst reports and rebut the bull.\n\nReports:\n{reports}\n\n\
                 Debate so far:\n{debate}\n\nPast lessons:\n{lessons}\n\nState CONFIDENCE: <0-1> \
                 and write CONSENSUS if you accept the other side's view."
            }
            AgentRole::ResearchManager => {
                "You manage the research desk for {symbol}. Weigh the bull/bear debate \
                 below (current lean: {lean}) and commit to one stance.\n\nDebate:\n{debate}\n\n\
                 Past lessons:\n{lessons}\n\nEnd with FINAL TRANSACTION PROPOSAL: \
                 **BUY/HOLD/SELL** and CONFIDENCE: <0-1>."
            }
            AgentRole::Trader => {
                "You are the trader for {symbol} on {date}. Turn the investment plan into a \
                 concrete trade given the portfolio.\n\nPlan: {plan}\n\nPortfolio: {portfolio}\n\n\
                 Past lessons:\n{lessons}\n\nEnd with FINAL TRANSACTION PROPOSAL: \
                 **BUY/HOLD/SELL**, SIZE: <fraction of equity> and CONFIDENCE: <0-1>."
            }
            AgentRole::AggressiveDebator => {
                "You argue for taking more risk on the proposed {symbol} trade.\n\n\
                 Proposal: {proposal}\n\nRisk debate so far:\n{debate}\n\nState your stance as \
                 **BUY/HOLD/SELL**, a SIZE: <fraction> and CONFIDENCE: <0-1>."
            }
            AgentRole::ConservativeDebator => {
                "You argue for protecting capital on the proposed {symbol} trade.\n\n\
                 Proposal: {proposal}\n\nRisk debate so far:\n{debate}\n\nState your stance as \
                 **BUY/HOLD/SELL**, a SIZE: <fraction> and CONFIDENCE: <0-1>."
            }
            AgentRole::NeutralDebator => {
                "You weigh both sides of the risk debate on the proposed {symbol} trade.\n\n\
                 Proposal: {proposal}\n\nRisk debate so far:\n{debate}\n\nState your stance as \
                 **BUY/HOLD/SELL**, a SIZE: <fraction> and CONFIDENCE: <0-1>."
            }
            AgentRole::RiskManager => {
                "You are the risk manager for {symbol}. Judge the risk debate and issue the \
                 final decision.\n\nProposal: {proposal}\n\nRisk debate:\n{debate}\n\n\
                 Portfolio: {portfolio}\n\nPast lessons:\n{lessons}\n\nEnd with FINAL TRANSACTION \
                 PROPOSAL: **BUY/HOLD/SELL**, SIZE: <fraction>, STOP: <fraction below entry>, \
                 TARGET: <fraction above entry> and CONFIDENCE: <0-1>."
            }
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown agent role '{0}'")]
pub struct ParseRoleError(pub String);

impl FromStr for AgentRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        AgentRole::ALL
            .into_iter()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| ParseRoleError(s.to_string()))
    }
}
