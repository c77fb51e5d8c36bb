//! Orchestrator protocol tests: phase ordering, degradation, timeouts,
//! debate termination and the temporal wall on agent outputs.

use async_trait::async_trait;
use chrono::{Duration as Days, NaiveDate};
use quorum_core::agents::{
    Agent, AgentError, AgentOutput, AgentRequest, AgentRole, AgentRoster, AnalystReport,
    DebateTurn, HeuristicAgent, InvestmentPlan, RiskDecision, ScriptedAgent, TradeProposal,
};
use quorum_core::clock::AsOf;
use quorum_core::data::{DataManager, SyntheticSource};
use quorum_core::domain::{Action, DecisionId, PortfolioSnapshot, PortfolioState};
use quorum_core::memory::{MemoryStore, NewMemory, OutcomeLabel, RecallSettings};
use quorum_core::orchestrator::{
    AgentOrchestrator, ConsensusPolicy, DecisionContext, FailureKind, OrchestratorConfig, Phase,
    StepError, StepInputs,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const SYMBOL: &str = "SPY";

fn as_of() -> AsOf {
    AsOf::new(NaiveDate::from_ymd_opt(2023, 6, 15).unwrap())
}

fn manager() -> DataManager {
    let manager = DataManager::new(0);
    manager
        .prefetch(
            &SyntheticSource::new(42),
            &[SYMBOL.to_string()],
            NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 29).unwrap(),
        )
        .unwrap();
    manager
}

fn portfolio() -> PortfolioSnapshot {
    PortfolioState::new(100_000.0).snapshot(as_of().date())
}

fn report(stance: Action) -> AgentOutput {
    AgentOutput::Report(AnalystReport {
        role: AgentRole::MarketAnalyst,
        stance,
        confidence: 0.7,
        summary: format!("{stance} signal"),
        data_through: None,
        metrics: BTreeMap::new(),
    })
}

fn turn(stance: Action, confidence: f64, concede: bool) -> AgentOutput {
    AgentOutput::Turn(DebateTurn {
        role: AgentRole::BullResearcher,
        round: 0,
        stance,
        confidence,
        argument: format!("{stance} case"),
        concede,
        size_fraction: Some(0.1),
    })
}

fn scripted(output: AgentOutput) -> Arc<dyn Agent> {
    Arc::new(ScriptedAgent::always(output))
}

/// Every role answers BUY with sensible payloads.
fn buy_roster() -> AgentRoster {
    let mut roster = AgentRoster::new();
    for role in AgentRole::ANALYSTS {
        roster.insert(role, scripted(report(Action::Buy)));
    }
    roster
        .with(AgentRole::BullResearcher, scripted(turn(Action::Buy, 0.8, false)))
        .with(AgentRole::BearResearcher, scripted(turn(Action::Sell, 0.4, false)))
        .with(
            AgentRole::ResearchManager,
            scripted(AgentOutput::Plan(InvestmentPlan {
                action: Action::Buy,
                confidence: 0.8,
                rationale: "bull case stronger".into(),
            })),
        )
        .with(
            AgentRole::Trader,
            scripted(AgentOutput::Proposal(TradeProposal {
                action: Action::Buy,
                size_fraction: 0.15,
                confidence: 0.7,
                rationale: "enter".into(),
            })),
        )
        .with(AgentRole::AggressiveDebator, scripted(turn(Action::Buy, 0.8, false)))
        .with(AgentRole::ConservativeDebator, scripted(turn(Action::Buy, 0.5, false)))
        .with(AgentRole::NeutralDebator, scripted(turn(Action::Buy, 0.6, false)))
        .with(
            AgentRole::RiskManager,
            scripted(AgentOutput::Decision(RiskDecision {
                action: Action::Buy,
                confidence: 0.7,
                size_fraction: 0.1,
                stop_loss_pct: Some(0.05),
                take_profit_pct: None,
                rationale: "approved".into(),
            })),
        )
}

async fn run_with(
    roster: AgentRoster,
    config: OrchestratorConfig,
    data: &DataManager,
    memory: &MemoryStore,
) -> Result<DecisionContext, StepError> {
    let portfolio = portfolio();
    let orchestrator = AgentOrchestrator::new(roster, config);
    orchestrator
        .run(StepInputs {
            decision_id: DecisionId(1),
            symbol: SYMBOL,
            as_of: as_of(),
            data,
            memory,
            portfolio: &portfolio,
        })
        .await
}

async fn run(roster: AgentRoster, config: OrchestratorConfig) -> Result<DecisionContext, StepError> {
    let data = manager();
    let memory = MemoryStore::default();
    run_with(roster, config, &data, &memory).await
}

#[tokio::test]
async fn scripted_roster_yields_risk_manager_decision() {
    let ctx = run(buy_roster(), OrchestratorConfig::default()).await.unwrap();

    assert_eq!(ctx.id(), DecisionId(1));
    assert_eq!(ctx.symbol(), SYMBOL);
    assert_eq!(ctx.timestamp(), as_of().date());
    assert_eq!(ctx.cutoff(), as_of().date());
    assert_eq!(ctx.reports().len(), 4);
    assert_eq!(ctx.investment_debate().turns.len(), 2);
    assert_eq!(ctx.risk_debate().turns.len(), 3);
    assert_eq!(ctx.lean(), Action::Buy);
    assert_eq!(ctx.plan().action, Action::Buy);
    assert_eq!(ctx.proposal().action, Action::Buy);
    assert_eq!(ctx.action(), Action::Buy);
    assert!((ctx.decision().size_fraction - 0.1).abs() < 1e-12);
    assert_eq!(ctx.decision().stop_loss_pct, Some(0.05));
    assert!(!ctx.decision().forced_hold);
    assert!(!ctx.is_degraded());
}

#[tokio::test]
async fn risk_debators_speak_in_fixed_order() {
    let ctx = run(buy_roster(), OrchestratorConfig::default()).await.unwrap();
    let speakers: Vec<AgentRole> = ctx.risk_debate().turns.iter().map(|t| t.role).collect();
    assert_eq!(speakers, AgentRole::RISK_DEBATORS.to_vec());
}

#[tokio::test]
async fn all_analysts_failing_forces_hold() {
    let mut roster = buy_roster();
    for role in AgentRole::ANALYSTS {
        roster.insert(role, Arc::new(ScriptedAgent::failing("backend down")));
    }
    let ctx = run(roster, OrchestratorConfig::default()).await.unwrap();

    assert!(ctx.reports().is_empty());
    assert_eq!(ctx.action(), Action::Hold);
    assert!(ctx.decision().forced_hold);
    let analysis: Vec<_> = ctx
        .degradations()
        .iter()
        .filter(|d| d.phase == Phase::Analysis)
        .collect();
    assert_eq!(analysis.len(), 4);
    assert!(analysis.iter().all(|d| d.kind == FailureKind::AgentFailure));
}

#[tokio::test]
async fn stalled_analyst_times_out_and_others_proceed() {
    let roster = buy_roster().with(
        AgentRole::NewsAnalyst,
        Arc::new(ScriptedAgent::stalling(Duration::from_secs(10))),
    );
    let config = OrchestratorConfig {
        agent_timeout: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    };
    let ctx = run(roster, config).await.unwrap();

    assert_eq!(ctx.reports().len(), 3);
    assert!(!ctx.reports().contains_key(&AgentRole::NewsAnalyst));
    let timeouts: Vec<_> = ctx
        .degradations()
        .iter()
        .filter(|d| d.kind == FailureKind::AgentTimeout)
        .collect();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].role, Some(AgentRole::NewsAnalyst));
    assert_eq!(ctx.action(), Action::Buy);
}

#[tokio::test]
async fn failed_trader_degrades_to_hold_proposal() {
    let roster = buy_roster().with(AgentRole::Trader, Arc::new(ScriptedAgent::failing("parse error")));
    let ctx = run(roster, OrchestratorConfig::default()).await.unwrap();

    assert_eq!(ctx.proposal().action, Action::Hold);
    assert_eq!(ctx.degradations().len(), 1);
    assert_eq!(ctx.degradations()[0].phase, Phase::Trading);
    // the risk manager still has the final word
    assert_eq!(ctx.action(), Action::Buy);
}

#[tokio::test]
async fn missing_role_is_a_degradation() {
    let mut roster = AgentRoster::new();
    for role in AgentRole::ANALYSTS {
        roster.insert(role, scripted(report(Action::Buy)));
    }
    let ctx = run(roster, OrchestratorConfig::default()).await.unwrap();

    assert_eq!(ctx.action(), Action::Hold);
    assert!(ctx.degradations().iter().any(|d| d.role == Some(AgentRole::RiskManager)));
    assert!(ctx
        .degradations()
        .iter()
        .all(|d| d.kind == FailureKind::AgentFailure));
}

#[tokio::test]
async fn mutual_concession_ends_debate_early() {
    let roster = buy_roster()
        .with(AgentRole::BullResearcher, scripted(turn(Action::Buy, 0.8, true)))
        .with(AgentRole::BearResearcher, scripted(turn(Action::Sell, 0.3, true)));
    let mut config = OrchestratorConfig::default();
    config.debate.max_debate_rounds = 3;
    let ctx = run(roster.clone(), config.clone()).await.unwrap();

    assert!(ctx.investment_debate().consensus);
    assert_eq!(ctx.investment_debate().rounds, 1);
    assert_eq!(ctx.investment_debate().turns.len(), 2);

    config.debate.consensus = ConsensusPolicy::Never;
    let ctx = run(roster, config).await.unwrap();
    assert!(!ctx.investment_debate().consensus);
    assert_eq!(ctx.investment_debate().rounds, 3);
    let rounds: Vec<usize> = ctx.investment_debate().turns.iter().map(|t| t.round).collect();
    assert_eq!(rounds, vec![0, 0, 1, 1, 2, 2]);
}

#[tokio::test]
async fn report_beyond_cutoff_is_fatal() {
    let future = as_of().date() + Days::days(1);
    let leaky = AgentOutput::Report(AnalystReport {
        role: AgentRole::MarketAnalyst,
        stance: Action::Buy,
        confidence: 0.9,
        summary: "saw tomorrow".into(),
        data_through: Some(future),
        metrics: BTreeMap::new(),
    });
    let roster = buy_roster().with(AgentRole::MarketAnalyst, scripted(leaky));
    let err = run(roster, OrchestratorConfig::default()).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, StepError::Fatal(_)));
}

/// Reports back how many lessons it was handed, as its confidence.
struct LessonCounter;

#[async_trait]
impl Agent for LessonCounter {
    fn name(&self) -> &str {
        "lesson-counter"
    }

    async fn produce(&self, request: &AgentRequest<'_>) -> Result<AgentOutput, AgentError> {
        let mut out = turn(Action::Buy, request.lessons.len() as f64, false);
        if let AgentOutput::Turn(t) = &mut out {
            t.role = request.role;
            t.round = request.round;
        }
        Ok(out)
    }
}

#[tokio::test]
async fn researchers_receive_only_past_lessons() {
    let data = manager();
    let memory = MemoryStore::new(RecallSettings::default());
    for (closed_at, lesson) in [
        (as_of().date() - Days::days(20), "bought the breakout too late"),
        (as_of().date() - Days::days(5), "held through resistance"),
        (as_of().date() + Days::days(5), "not yet known"),
    ] {
        memory
            .append(NewMemory {
                role: AgentRole::BullResearcher,
                symbol: SYMBOL.into(),
                decided_at: closed_at - Days::days(10),
                closed_at,
                decision_id: None,
                stance: Action::Buy,
                situation: "SPY market analyst BUY".into(),
                lesson: lesson.into(),
                realized_return: 0.03,
                outcome: OutcomeLabel::Positive,
                hit: true,
            })
            .unwrap();
    }

    let roster = buy_roster().with(AgentRole::BullResearcher, Arc::new(LessonCounter));
    let ctx = run_with(roster, OrchestratorConfig::default(), &data, &memory)
        .await
        .unwrap();
    let bull = ctx.investment_debate().last_by(AgentRole::BullResearcher).unwrap();
    assert_eq!(bull.confidence, 2.0);
}

#[tokio::test]
async fn heuristic_roster_completes_a_step() {
    let roster = AgentRoster::uniform(Arc::new(HeuristicAgent));
    let ctx = run(roster, OrchestratorConfig::default()).await.unwrap();

    assert_eq!(ctx.reports().len(), 4);
    assert!(ctx
        .reports()
        .values()
        .all(|r| r.data_through.map_or(true, |d| d <= ctx.cutoff())));
    assert!(!ctx.decision().forced_hold);
}
