//! Deterministic, indicator-driven agents. No external service; every call
//! is a pure function of the request, so runs are reproducible.

use super::agent::{Agent, AgentRequest};
use super::error::AgentError;
use super::output::{
    AgentOutput, AnalystReport, DebateTurn, InvestmentPlan, RiskDecision, TradeProposal,
};
use super::role::AgentRole;
use crate::data::{DataError, DataView};
use crate::domain::{Action, SeriesField};
use crate::memory::OutcomeLabel;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Score margin at which both researchers accept the debate is settled.
const CONSENSUS_MARGIN: f64 = 0.5;
/// Manager needs this much confidence gap to overrule the lean.
const MANAGER_GAP: f64 = 0.1;
/// ATR/close above this makes the conservative debator refuse new risk.
const MAX_CALM_VOLATILITY: f64 = 0.04;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAgent;

impl HeuristicAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for HeuristicAgent {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn produce(&self, request: &AgentRequest<'_>) -> Result<AgentOutput, AgentError> {
        let out = match request.role {
            AgentRole::MarketAnalyst => AgentOutput::Report(market_report(request)?),
            AgentRole::NewsAnalyst => AgentOutput::Report(news_report(request)?),
            AgentRole::SocialAnalyst => AgentOutput::Report(social_report(request)?),
            AgentRole::FundamentalsAnalyst => AgentOutput::Report(fundamentals_report(request)?),
            AgentRole::BullResearcher | AgentRole::BearResearcher => {
                AgentOutput::Turn(researcher_turn(request))
            }
            AgentRole::ResearchManager => AgentOutput::Plan(manage_research(request)),
            AgentRole::Trader => AgentOutput::Proposal(propose_trade(request)?),
            AgentRole::AggressiveDebator
            | AgentRole::ConservativeDebator
            | AgentRole::NeutralDebator => AgentOutput::Turn(risk_turn(request)),
            AgentRole::RiskManager => AgentOutput::Decision(decide_risk(request)),
        };
        Ok(out)
    }
}

fn latest_value(view: &DataView<'_>, symbol: &str, field: SeriesField) -> Result<f64, DataError> {
    let series = view.series(symbol, &field, 1)?;
    Ok(series[series.len() - 1])
}

fn indicator(view: &DataView<'_>, symbol: &str, name: &str) -> Result<f64, DataError> {
    latest_value(view, symbol, SeriesField::indicator(name))
}

fn stance_of(score: f64, threshold: f64) -> Action {
    if score >= threshold {
        Action::Buy
    } else if score <= -threshold {
        Action::Sell
    } else {
        Action::Hold
    }
}

fn report(
    request: &AgentRequest<'_>,
    stance: Action,
    confidence: f64,
    summary: String,
    metrics: BTreeMap<String, f64>,
) -> Result<AnalystReport, AgentError> {
    let latest = request.data.latest(request.symbol)?;
    Ok(AnalystReport {
        role: request.role,
        stance,
        confidence: confidence.clamp(0.0, 1.0),
        summary,
        data_through: Some(latest.timestamp),
        metrics,
    })
}

// ─── Phase 1: analysts ───────────────────────────────────────────────

/// Trend alignment of close, SMA(20), SMA(50) and RSI(14).
fn market_report(request: &AgentRequest<'_>) -> Result<AnalystReport, AgentError> {
    let view = &request.data;
    let symbol = request.symbol;
    let close = latest_value(view, symbol, SeriesField::Close)?;
    let sma20 = indicator(view, symbol, "sma_20")?;
    let rsi = indicator(view, symbol, "rsi_14")?;
    let sma50 = indicator(view, symbol, "sma_50").ok();

    let mut score = if close > sma20 { 1.0 } else { -1.0 };
    if let Some(sma50) = sma50 {
        score += if sma20 > sma50 { 1.0 } else { -1.0 };
    }
    if rsi > 70.0 {
        score -= 1.0;
    } else if rsi < 30.0 {
        score += 1.0;
    }

    let stance = stance_of(score, 2.0);
    let confidence = (0.5 + 0.15 * f64::abs(score)).min(0.95);
    let summary = format!(
        "close {close:.2} vs SMA20 {sma20:.2}{}; RSI14 {rsi:.1}; trend score {score:+.0}",
        sma50.map(|v| format!(" / SMA50 {v:.2}")).unwrap_or_default()
    );

    let mut metrics = BTreeMap::from([
        ("close".to_string(), close),
        ("sma_20".to_string(), sma20),
        ("rsi_14".to_string(), rsi),
    ]);
    if let Some(v) = sma50 {
        metrics.insert("sma_50".into(), v);
    }
    report(request, stance, confidence, summary, metrics)
}

/// Five-session cumulative return as a proxy for news flow.
fn news_report(request: &AgentRequest<'_>) -> Result<AnalystReport, AgentError> {
    let returns = request
        .data
        .series(request.symbol, &SeriesField::indicator("return_1d"), 5)?;
    let cumulative: f64 = returns.iter().sum();
    let shock = returns
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);

    let stance = stance_of(cumulative, 0.02);
    let confidence = 0.5 + (cumulative.abs() * 5.0).min(0.4);
    let summary = format!(
        "5-session return {:+.2}%, largest single move {:+.2}%",
        cumulative * 100.0,
        shock * 100.0
    );
    let metrics = BTreeMap::from([
        ("return_5d".to_string(), cumulative),
        ("largest_move".to_string(), shock),
    ]);
    report(request, stance, confidence, summary, metrics)
}

/// Volume surge relative to the 20-session average, signed by the last move.
fn social_report(request: &AgentRequest<'_>) -> Result<AnalystReport, AgentError> {
    let view = &request.data;
    let volumes = view.series(request.symbol, &SeriesField::Volume, 20)?;
    let last_return = indicator(view, request.symbol, "return_1d")?;
    let average = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let surge = if average > 0.0 {
        volumes[volumes.len() - 1] / average
    } else {
        1.0
    };

    let (stance, confidence) = if surge > 1.5 {
        (
            stance_of(last_return, f64::MIN_POSITIVE),
            0.5 + ((surge - 1.5) * 0.2).min(0.3),
        )
    } else {
        (Action::Hold, 0.3)
    };
    let summary = format!(
        "volume {surge:.2}x its 20-session average, last move {:+.2}%",
        last_return * 100.0
    );
    let metrics = BTreeMap::from([
        ("volume_surge".to_string(), surge),
        ("return_1d".to_string(), last_return),
    ]);
    report(request, stance, confidence, summary, metrics)
}

/// Position of the close inside its 50-session range; cheap buys, stretched sells.
fn fundamentals_report(request: &AgentRequest<'_>) -> Result<AnalystReport, AgentError> {
    let closes = request
        .data
        .series(request.symbol, &SeriesField::Close, 50)?;
    let low = closes.iter().copied().fold(f64::INFINITY, f64::min);
    let high = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let close = closes[closes.len() - 1];
    let position = if high > low {
        (close - low) / (high - low)
    } else {
        0.5
    };

    let stance = if position < 0.2 {
        Action::Buy
    } else if position > 0.8 {
        Action::Sell
    } else {
        Action::Hold
    };
    let confidence = 0.5 + (position - 0.5).abs() * 0.6;
    let summary = format!(
        "close at {:.0}% of its 50-session range [{low:.2}, {high:.2}]",
        position * 100.0
    );
    let metrics = BTreeMap::from([
        ("range_position".to_string(), position),
        ("range_low".to_string(), low),
        ("range_high".to_string(), high),
    ]);
    report(request, stance, confidence, summary, metrics)
}

// ─── Phase 2: researchers ────────────────────────────────────────────

/// Confidence-weighted votes for BUY and SELL across analyst reports.
fn report_scores(reports: &BTreeMap<AgentRole, AnalystReport>) -> (f64, f64) {
    reports.values().fold((0.0, 0.0), |(bull, bear), r| match r.stance {
        Action::Buy => (bull + r.confidence, bear),
        Action::Sell => (bull, bear + r.confidence),
        Action::Hold => (bull, bear),
    })
}

/// Share of recalled lessons that ended badly.
fn negative_share(request: &AgentRequest<'_>) -> f64 {
    if request.lessons.is_empty() {
        return 0.0;
    }
    let negative = request
        .lessons
        .iter()
        .filter(|l| l.outcome == OutcomeLabel::Negative)
        .count();
    negative as f64 / request.lessons.len() as f64
}

fn researcher_turn(request: &AgentRequest<'_>) -> DebateTurn {
    let (bull, bear) = report_scores(request.reports);
    let total = bull + bear;
    let is_bull = request.role == AgentRole::BullResearcher;
    let (own, other, stance) = if is_bull {
        (bull, bear, Action::Buy)
    } else {
        (bear, bull, Action::Sell)
    };

    let share = if total > 0.0 { own / total } else { 0.5 };
    let confidence = (share * (1.0 - 0.2 * negative_share(request))).clamp(0.0, 1.0);
    let margin = if total > 0.0 { (bull - bear).abs() / total } else { 0.0 };
    let concede = request.round > 0 && margin >= CONSENSUS_MARGIN;

    let rebuttal = match request.last_turn_by(if is_bull {
        AgentRole::BearResearcher
    } else {
        AgentRole::BullResearcher
    }) {
        Some(t) if !t.is_empty() => format!(
            " The other side's confidence of {:.2} rests on {:.2} of weighted evidence.",
            t.confidence, other
        ),
        _ => String::new(),
    };
    let argument = format!(
        "{} evidence weighs {own:.2} against {other:.2} across {} reports.{rebuttal}",
        if is_bull { "Bullish" } else { "Bearish" },
        request.reports.len()
    );

    DebateTurn {
        role: request.role,
        round: request.round,
        stance,
        confidence,
        argument,
        concede,
        size_fraction: None,
    }
}

// ─── Phase 3: research manager ───────────────────────────────────────

fn manage_research(request: &AgentRequest<'_>) -> InvestmentPlan {
    let bull_turn = request.last_turn_by(AgentRole::BullResearcher);
    let bear_turn = request.last_turn_by(AgentRole::BearResearcher);
    let (bull, bear) = match (bull_turn, bear_turn) {
        (None, None) => {
            let (b, s) = report_scores(request.reports);
            let total = b + s;
            if total > 0.0 {
                (b / total, s / total)
            } else {
                (0.0, 0.0)
            }
        }
        _ => (
            bull_turn.map_or(0.0, |t| t.confidence),
            bear_turn.map_or(0.0, |t| t.confidence),
        ),
    };

    let (action, confidence) = if bull - bear > MANAGER_GAP {
        (Action::Buy, bull)
    } else if bear - bull > MANAGER_GAP {
        (Action::Sell, bear)
    } else {
        (request.lean.unwrap_or(Action::Hold), bull.max(bear) * 0.5)
    };
    let confidence = (confidence * (1.0 - 0.2 * negative_share(request))).clamp(0.0, 1.0);

    InvestmentPlan {
        action,
        confidence,
        rationale: format!(
            "bull {bull:.2} vs bear {bear:.2}; {} lessons recalled",
            request.lessons.len()
        ),
    }
}

// ─── Phase 4: trader ─────────────────────────────────────────────────

fn propose_trade(request: &AgentRequest<'_>) -> Result<TradeProposal, AgentError> {
    let plan = request
        .plan
        .ok_or_else(|| AgentError::failed(request.role, "no investment plan"))?;
    let held = request.portfolio.position(request.symbol);
    let entry_size = 0.05 + 0.15 * plan.confidence;

    let proposal = match (plan.action, held) {
        (Action::Hold, _) => TradeProposal::hold("plan is HOLD"),
        (Action::Buy, Some(p)) if p.is_long() => TradeProposal::hold("already long"),
        (Action::Sell, Some(p)) if p.is_short() => TradeProposal::hold("already short"),
        (Action::Sell, Some(p)) if p.is_long() => TradeProposal {
            action: Action::Sell,
            size_fraction: 1.0,
            confidence: plan.confidence,
            rationale: format!("exit long of {:.0} shares", p.quantity),
        },
        (Action::Buy, Some(p)) if p.is_short() => TradeProposal {
            action: Action::Buy,
            size_fraction: 1.0,
            confidence: plan.confidence,
            rationale: format!("cover short of {:.0} shares", p.quantity.abs()),
        },
        (action, _) => TradeProposal {
            action,
            size_fraction: entry_size,
            confidence: plan.confidence,
            rationale: format!("enter {action} at {:.0}% of equity", entry_size * 100.0),
        },
    };
    Ok(proposal)
}

/// Whether the proposal closes an existing position rather than adding risk.
fn is_exit(request: &AgentRequest<'_>, proposal: &TradeProposal) -> bool {
    match (proposal.action, request.portfolio.position(request.symbol)) {
        (Action::Sell, Some(p)) => p.is_long(),
        (Action::Buy, Some(p)) => p.is_short(),
        _ => false,
    }
}

// ─── Phase 5: risk debators ──────────────────────────────────────────

fn risk_turn(request: &AgentRequest<'_>) -> DebateTurn {
    let hold = TradeProposal::hold("no proposal");
    let proposal = request.proposal.unwrap_or(&hold);
    let exit = is_exit(request, proposal);

    let (stance, size, argument) = match request.role {
        AgentRole::AggressiveDebator => (
            proposal.action,
            if exit { proposal.size_fraction } else { proposal.size_fraction * 1.5 },
            "upside justifies a larger allocation".to_string(),
        ),
        AgentRole::ConservativeDebator => {
            let volatility = volatility(request);
            match volatility {
                Some(v) if v > MAX_CALM_VOLATILITY && !exit => (
                    Action::Hold,
                    0.0,
                    format!("ATR is {:.1}% of price; stand aside", v * 100.0),
                ),
                _ => (
                    proposal.action,
                    if exit { proposal.size_fraction } else { proposal.size_fraction * 0.5 },
                    "take the trade at half size".to_string(),
                ),
            }
        }
        _ => {
            let suggested: Vec<f64> = request
                .debate
                .iter()
                .filter_map(|t| t.size_fraction)
                .chain(std::iter::once(proposal.size_fraction))
                .collect();
            let mean = suggested.iter().sum::<f64>() / suggested.len() as f64;
            (
                proposal.action,
                mean,
                format!("balance the {} size views heard so far", suggested.len()),
            )
        }
    };

    DebateTurn {
        role: request.role,
        round: request.round,
        stance,
        confidence: proposal.confidence,
        argument,
        concede: false,
        size_fraction: Some(size),
    }
}

fn volatility(request: &AgentRequest<'_>) -> Option<f64> {
    let atr = indicator(&request.data, request.symbol, "atr_14").ok()?;
    let close = latest_value(&request.data, request.symbol, SeriesField::Close).ok()?;
    (close > 0.0).then(|| atr / close)
}

// ─── Phase 6: risk manager ───────────────────────────────────────────

fn decide_risk(request: &AgentRequest<'_>) -> RiskDecision {
    let Some(proposal) = request.proposal else {
        return RiskDecision::hold("no trade proposal");
    };
    if proposal.action.is_hold() {
        return RiskDecision::hold(proposal.rationale.clone());
    }

    let exit = is_exit(request, proposal);
    let final_round: Vec<&DebateTurn> = {
        let last = request.debate.iter().map(|t| t.round).max();
        request
            .debate
            .iter()
            .filter(|t| Some(t.round) == last && !t.is_empty())
            .collect()
    };
    let hold_votes = final_round.iter().filter(|t| t.stance.is_hold()).count();
    if !exit && !final_round.is_empty() && hold_votes * 2 > final_round.len() {
        return RiskDecision::hold(format!(
            "{hold_votes} of {} debators advise standing aside",
            final_round.len()
        ));
    }

    let size_fraction = if exit {
        proposal.size_fraction
    } else {
        let sizes: Vec<f64> = final_round.iter().filter_map(|t| t.size_fraction).collect();
        if sizes.is_empty() {
            proposal.size_fraction
        } else {
            sizes.iter().sum::<f64>() / sizes.len() as f64
        }
    };

    let (stop_loss_pct, take_profit_pct) = match volatility(request) {
        Some(v) if !exit => (Some(2.0 * v), Some(3.0 * v)),
        _ => (None, None),
    };

    RiskDecision {
        action: proposal.action,
        confidence: proposal.confidence,
        size_fraction,
        stop_loss_pct,
        take_profit_pct,
        rationale: format!(
            "{} at {:.1}% of equity after {} risk turns",
            proposal.action,
            size_fraction * 100.0,
            request.debate.len()
        ),
    }
}
