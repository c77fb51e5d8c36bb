//! Adapter from a text-completion backend to the `Agent` capability.
//!
//! The role template is rendered from the request, sent to the backend, and
//! the reply is parsed into the typed output for the role's phase.

use super::agent::{Agent, AgentRequest};
use super::error::AgentError;
use super::output::{
    AgentOutput, AnalystReport, DebateTurn, InvestmentPlan, RiskDecision, TradeProposal,
};
use super::role::AgentRole;
use super::signal::{extract_action, extract_confidence, extract_number, signals_consensus};
use crate::domain::Action;
use crate::orchestrator::Phase;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Arc;

/// Snapshots included in the `{market}` placeholder.
const MARKET_ROWS: usize = 10;
const DEFAULT_CONFIDENCE: f64 = 0.5;

#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(&self, role: AgentRole, prompt: &str) -> Result<String, AgentError>;
}

/// Plain functions work as backends, which keeps tests short.
#[async_trait]
impl<F> TextBackend for F
where
    F: Fn(AgentRole, &str) -> String + Send + Sync,
{
    async fn complete(&self, role: AgentRole, prompt: &str) -> Result<String, AgentError> {
        Ok(self(role, prompt))
    }
}

pub struct TextAgent {
    backend: Arc<dyn TextBackend>,
    templates: HashMap<AgentRole, String>,
}

impl TextAgent {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self {
            backend,
            templates: HashMap::new(),
        }
    }

    pub fn with_template(mut self, role: AgentRole, template: impl Into<String>) -> Self {
        self.templates.insert(role, template.into());
        self
    }

    fn template(&self, role: AgentRole) -> &str {
        self.templates
            .get(&role)
            .map(String::as_str)
            .unwrap_or_else(|| role.default_template())
    }

    /// Fill `{placeholder}`s in the role template.
    ///
    /// Substitution is a single pass over the template: text pulled in from
    /// reports, debate turns or lessons is never scanned for placeholders.
    /// Unknown `{names}` are left as written.
    pub fn render(&self, request: &AgentRequest<'_>) -> String {
        let values: HashMap<&str, String> = placeholders(request).into_iter().collect();
        let mut rest = self.template(request.role);
        let mut out = String::with_capacity(rest.len());
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}').and_then(|close| Some((close, values.get(&after[..close])?))) {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl std::fmt::Debug for TextAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextAgent")
            .field("templates", &self.templates.len())
            .finish()
    }
}

#[async_trait]
impl Agent for TextAgent {
    fn name(&self) -> &str {
        "text"
    }

    async fn produce(&self, request: &AgentRequest<'_>) -> Result<AgentOutput, AgentError> {
        let prompt = self.render(request);
        let reply = self.backend.complete(request.role, &prompt).await?;
        if reply.trim().is_empty() {
            return Err(AgentError::failed(request.role, "empty reply"));
        }
        parse_reply(request, &reply)
    }
}

fn placeholders(request: &AgentRequest<'_>) -> Vec<(&'static str, String)> {
    vec![
        ("symbol", request.symbol.to_string()),
        ("date", request.as_of().to_string()),
        ("cutoff", request.data.cutoff().to_string()),
        ("market", render_market(request)),
        ("reports", render_reports(request.reports)),
        ("debate", render_debate(request.debate)),
        ("lessons", render_lessons(request)),
        (
            "lean",
            request.lean.map_or_else(|| "none".into(), |a| a.to_string()),
        ),
        (
            "plan",
            request.plan.map_or_else(
                || "none".into(),
                |p| format!("{} (confidence {:.2}): {}", p.action, p.confidence, p.rationale),
            ),
        ),
        (
            "proposal",
            request.proposal.map_or_else(
                || "none".into(),
                |p| {
                    format!(
                        "{} {:.1}% of equity (confidence {:.2}): {}",
                        p.action,
                        p.size_fraction * 100.0,
                        p.confidence,
                        p.rationale
                    )
                },
            ),
        ),
        ("portfolio", render_portfolio(request)),
    ]
}

fn render_market(request: &AgentRequest<'_>) -> String {
    let Ok(rows) = request.data.snapshots(request.symbol, MARKET_ROWS) else {
        return "no visible data".into();
    };
    let mut out = String::from("date,open,high,low,close,volume");
    for s in rows {
        let _ = write!(
            out,
            "\n{},{:.2},{:.2},{:.2},{:.2},{}",
            s.timestamp, s.open, s.high, s.low, s.close, s.volume
        );
        for (name, value) in &s.indicators {
            if value.is_finite() {
                let _ = write!(out, ",{name}={value:.3}");
            }
        }
    }
    out
}

fn render_reports(reports: &BTreeMap<AgentRole, AnalystReport>) -> String {
    if reports.is_empty() {
        return "none".into();
    }
    reports
        .values()
        .map(|r| format!("- {} [{} {:.2}]: {}", r.role, r.stance, r.confidence, r.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_debate(turns: &[DebateTurn]) -> String {
    if turns.is_empty() {
        return "none".into();
    }
    turns
        .iter()
        .map(|t| format!("[round {}] {}: {}", t.round + 1, t.role, t.argument))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_lessons(request: &AgentRequest<'_>) -> String {
    if request.lessons.is_empty() {
        return "none".into();
    }
    request
        .lessons
        .iter()
        .map(|l| format!("- {}", l.lesson))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_portfolio(request: &AgentRequest<'_>) -> String {
    let p = request.portfolio;
    let held = p
        .position(request.symbol)
        .map_or_else(|| "flat".to_string(), |pos| format!("{:+.0} @ {:.2}", pos.quantity, pos.entry_price));
    format!(
        "cash {:.2}, equity {:.2}, {} open positions, {}: {held}",
        p.cash,
        p.equity,
        p.open_position_count(),
        request.symbol
    )
}

fn parse_reply(request: &AgentRequest<'_>, reply: &str) -> Result<AgentOutput, AgentError> {
    let role = request.role;
    let confidence = extract_confidence(reply).unwrap_or(DEFAULT_CONFIDENCE);
    let action = extract_action(reply);
    let size = extract_number(reply, "SIZE").map(|s| s.max(0.0));

    let out = match role.phase() {
        Phase::Analysis => AgentOutput::Report(AnalystReport {
            role,
            stance: action.unwrap_or(Action::Hold),
            confidence,
            summary: reply.trim().to_string(),
            data_through: None,
            metrics: BTreeMap::new(),
        }),
        Phase::InvestmentDebate | Phase::RiskDebate => {
            let default_stance = match role {
                AgentRole::BullResearcher => Action::Buy,
                AgentRole::BearResearcher => Action::Sell,
                _ => request.proposal.map_or(Action::Hold, |p| p.action),
            };
            AgentOutput::Turn(DebateTurn {
                role,
                round: request.round,
                stance: action.unwrap_or(default_stance),
                confidence,
                argument: reply.trim().to_string(),
                concede: signals_consensus(reply),
                size_fraction: size,
            })
        }
        Phase::ResearchManagement => AgentOutput::Plan(InvestmentPlan {
            action: action.ok_or_else(|| AgentError::failed(role, "no action in reply"))?,
            confidence,
            rationale: reply.trim().to_string(),
        }),
        Phase::Trading => AgentOutput::Proposal(TradeProposal {
            action: action.ok_or_else(|| AgentError::failed(role, "no action in reply"))?,
            size_fraction: size.unwrap_or(0.0),
            confidence,
            rationale: reply.trim().to_string(),
        }),
        Phase::RiskManagement => AgentOutput::Decision(RiskDecision {
            action: action.ok_or_else(|| AgentError::failed(role, "no action in reply"))?,
            confidence,
            size_fraction: size.unwrap_or(0.0),
            stop_loss_pct: extract_number(reply, "STOP").filter(|v| *v > 0.0),
            take_profit_pct: extract_number(reply, "TARGET").filter(|v| *v > 0.0),
            rationale: reply.trim().to_string(),
        }),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::AsOf;
    use crate::data::DataManager;
    use crate::domain::PortfolioSnapshot;
    use chrono::NaiveDate;

    fn snapshot() -> PortfolioSnapshot {
        PortfolioSnapshot {
            as_of: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            cash: 1_000.0,
            equity: 1_000.0,
            positions: Default::default(),
        }
    }

    #[tokio::test]
    async fn renders_template_and_parses_risk_decision() {
        let manager = DataManager::new(0);
        let portfolio = snapshot();
        let backend = |role: AgentRole, prompt: &str| {
            assert_eq!(role, AgentRole::RiskManager);
            assert!(prompt.contains("ACME"));
            "Looks fine. FINAL TRANSACTION PROPOSAL: **BUY** SIZE: 0.1 STOP: 5% TARGET: 0.15 CONFIDENCE: 0.8"
                .to_string()
        };
        let agent = TextAgent::new(Arc::new(backend));
        let request = AgentRequest::new(
            AgentRole::RiskManager,
            "ACME",
            manager.view(AsOf::new(portfolio.as_of)),
            &portfolio,
        );
        let decision = agent
            .produce(&request)
            .await
            .unwrap()
            .into_decision(AgentRole::RiskManager)
            .unwrap();
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.size_fraction, 0.1);
        assert_eq!(decision.stop_loss_pct, Some(0.05));
        assert_eq!(decision.take_profit_pct, Some(0.15));
        assert_eq!(decision.confidence, 0.8);
    }

    #[tokio::test]
    async fn custom_template_and_missing_action() {
        let manager = DataManager::new(0);
        let portfolio = snapshot();
        let agent = TextAgent::new(Arc::new(|_: AgentRole, prompt: &str| prompt.to_string()))
            .with_template(AgentRole::Trader, "trade {symbol} with plan {plan}");
        let request = AgentRequest::new(
            AgentRole::Trader,
            "ACME",
            manager.view(AsOf::new(portfolio.as_of)),
            &portfolio,
        );
        assert_eq!(agent.render(&request), "trade ACME with plan none");
        let err = agent.produce(&request).await.unwrap_err();
        assert!(matches!(err, AgentError::Failed { .. }));
    }

    #[test]
    fn substituted_text_is_not_expanded_again() {
        let manager = DataManager::new(0);
        let portfolio = snapshot();
        let plan = InvestmentPlan {
            action: Action::Buy,
            confidence: 0.6,
            rationale: "ignore {portfolio} and {symbol}".into(),
        };
        let agent = TextAgent::new(Arc::new(|_: AgentRole, prompt: &str| prompt.to_string()))
            .with_template(AgentRole::Trader, "{symbol}: {plan} | {unknown} {symbol");
        let request = AgentRequest::new(
            AgentRole::Trader,
            "ACME",
            manager.view(AsOf::new(portfolio.as_of)),
            &portfolio,
        )
        .with_plan(&plan);
        assert_eq!(
            agent.render(&request),
            "ACME: BUY (confidence 0.60): ignore {portfolio} and {symbol} | {unknown} {symbol"
        );
    }
}
