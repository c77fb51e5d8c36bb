//! The six decision phases and the forward-only machine that sequences them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysis,
    InvestmentDebate,
    ResearchManagement,
    Trading,
    RiskDebate,
    RiskManagement,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Analysis,
        Phase::InvestmentDebate,
        Phase::ResearchManagement,
        Phase::Trading,
        Phase::RiskDebate,
        Phase::RiskManagement,
    ];

    /// 1-based position in the protocol.
    pub fn number(&self) -> usize {
        match self {
            Phase::Analysis => 1,
            Phase::InvestmentDebate => 2,
            Phase::ResearchManagement => 3,
            Phase::Trading => 4,
            Phase::RiskDebate => 5,
            Phase::RiskManagement => 6,
        }
    }

    pub fn next(&self) -> Option<Phase> {
        Phase::ORDER.get(self.number()).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Analysis => "analysis",
            Phase::InvestmentDebate => "investment_debate",
            Phase::ResearchManagement => "research_management",
            Phase::Trading => "trading",
            Phase::RiskDebate => "risk_debate",
            Phase::RiskManagement => "risk_management",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("phase {got} entered out of order (expected {expected:?})")]
    OutOfOrder { expected: Option<Phase>, got: Phase },

    #[error("phase protocol incomplete: stopped after {last:?}")]
    Incomplete { last: Option<Phase> },
}

/// Tracks progress through the protocol for one (symbol, step).
///
/// Phases may only be entered in `Phase::ORDER`, each exactly once.
#[derive(Debug, Clone, Default)]
pub struct PhaseMachine {
    current: Option<Phase>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    fn expected(&self) -> Option<Phase> {
        match self.current {
            None => Some(Phase::Analysis),
            Some(p) => p.next(),
        }
    }

    pub fn enter(&mut self, phase: Phase) -> Result<(), PhaseError> {
        let expected = self.expected();
        if expected != Some(phase) {
            return Err(PhaseError::OutOfOrder {
                expected,
                got: phase,
            });
        }
        self.current = Some(phase);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.current == Some(Phase::RiskManagement)
    }

    /// Succeeds only once the final phase has been entered.
    pub fn finish(&self) -> Result<(), PhaseError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(PhaseError::Incomplete { last: self.current })
        }
    }
}
