use super::output::AgentOutput;
use super::role::AgentRole;
use crate::data::DataError;
use crate::orchestrator::FailureKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{role} failed: {reason}")]
    Failed { role: AgentRole, reason: String },

    #[error("{role} timed out after {timeout_ms}ms")]
    Timeout { role: AgentRole, timeout_ms: u64 },

    #[error("{role} returned a {got} where a {expected} was expected")]
    UnexpectedOutput {
        role: AgentRole,
        expected: &'static str,
        got: &'static str,
    },

    #[error("no agent registered for role {0}")]
    MissingRole(AgentRole),

    #[error(transparent)]
    Data(#[from] DataError),
}

impl AgentError {
    pub fn failed(role: AgentRole, reason: impl Into<String>) -> Self {
        AgentError::Failed {
            role,
            reason: reason.into(),
        }
    }

    pub(crate) fn unexpected(role: AgentRole, expected: &'static str, got: &AgentOutput) -> Self {
        AgentError::UnexpectedOutput {
            role,
            expected,
            got: got.kind(),
        }
    }

    /// Data errors that break the temporal wall are fatal to the run; every
    /// other agent error only degrades one contribution.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Data(e) if e.is_fatal())
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AgentError::Timeout { .. } => FailureKind::AgentTimeout,
            AgentError::Data(DataError::InsufficientHistory { .. }) => {
                FailureKind::InsufficientHistory
            }
            _ => FailureKind::AgentFailure,
        }
    }
}
