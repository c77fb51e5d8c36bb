//! Agents that replay fixed responses, keyed optionally by date.
//!
//! Used to force specific decisions in tests and demos, and to inject
//! failures and stalls into the orchestrator.

use super::agent::{Agent, AgentRequest};
use super::error::AgentError;
use super::output::AgentOutput;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Script {
    Respond(AgentOutput),
    Fail(String),
    /// Sleep, then fail. Long stalls exercise the per-call timeout.
    Stall(Duration),
}

#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    name: String,
    fallback: Script,
    by_date: BTreeMap<NaiveDate, Script>,
}

impl ScriptedAgent {
    pub fn new(fallback: Script) -> Self {
        Self {
            name: "scripted".into(),
            fallback,
            by_date: BTreeMap::new(),
        }
    }

    pub fn always(output: AgentOutput) -> Self {
        Self::new(Script::Respond(output))
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::new(Script::Fail(reason.into()))
    }

    pub fn stalling(delay: Duration) -> Self {
        Self::new(Script::Stall(delay))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the response for steps whose as-of date is `date`.
    pub fn on(mut self, date: NaiveDate, script: Script) -> Self {
        self.by_date.insert(date, script);
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, request: &AgentRequest<'_>) -> Result<AgentOutput, AgentError> {
        let script = self
            .by_date
            .get(&request.as_of().date())
            .unwrap_or(&self.fallback);
        match script {
            Script::Respond(output) => Ok(retag(output.clone(), request)),
            Script::Fail(reason) => Err(AgentError::failed(request.role, reason.clone())),
            Script::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                Err(AgentError::failed(request.role, "stalled"))
            }
        }
    }
}

/// Stamp role and round from the request onto canned outputs so one script
/// can serve several roles.
fn retag(output: AgentOutput, request: &AgentRequest<'_>) -> AgentOutput {
    match output {
        AgentOutput::Report(mut r) => {
            r.role = request.role;
            AgentOutput::Report(r)
        }
        AgentOutput::Turn(mut t) => {
            t.role = request.role;
            t.round = request.round;
            AgentOutput::Turn(t)
        }
        other => other,
    }
}
