//! Debate transcripts and the policies that end and settle them.

use crate::agents::{AgentRole, DebateTurn};
use crate::domain::Action;
use serde::{Deserialize, Serialize};

/// When a bull/bear debate may stop before its round limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPolicy {
    /// Both speakers set `concede` in the same round.
    #[default]
    BothConcede,
    /// Both speakers argue the same stance in the same round.
    StanceAgreement,
    /// Always run the full round limit.
    Never,
}

impl ConsensusPolicy {
    pub fn reached(&self, first: &DebateTurn, second: &DebateTurn) -> bool {
        match self {
            ConsensusPolicy::BothConcede => first.concede && second.concede,
            ConsensusPolicy::StanceAgreement => {
                !first.is_empty() && !second.is_empty() && first.stance == second.stance
            }
            ConsensusPolicy::Never => false,
        }
    }
}

/// Verdict when bull and bear finish with exactly equal confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Hold,
    FavorBull,
    FavorBear,
}

impl TieBreak {
    /// Direction the debate leans: the more confident side, or this policy
    /// on an exact tie.
    pub fn verdict(&self, bull: f64, bear: f64) -> Action {
        if bull > bear {
            Action::Buy
        } else if bear > bull {
            Action::Sell
        } else {
            match self {
                TieBreak::Hold => Action::Hold,
                TieBreak::FavorBull => Action::Buy,
                TieBreak::FavorBear => Action::Sell,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    pub max_debate_rounds: usize,
    pub max_risk_rounds: usize,
    pub consensus: ConsensusPolicy,
    pub tie_break: TieBreak,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            max_debate_rounds: 1,
            max_risk_rounds: 1,
            consensus: ConsensusPolicy::default(),
            tie_break: TieBreak::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<DebateTurn>,
    pub rounds: usize,
    /// Ended early on the consensus predicate.
    pub consensus: bool,
}

impl Transcript {
    pub fn last_by(&self, role: AgentRole) -> Option<&DebateTurn> {
        self.turns.iter().rev().find(|t| t.role == role)
    }

    /// Confidence of `role`'s last turn; 0.0 if it never spoke.
    pub fn final_confidence(&self, role: AgentRole) -> f64 {
        self.last_by(role).map_or(0.0, |t| t.confidence)
    }
}
