//! BacktestEngine: the step loop.
//!
//! Per session, in order:
//! 1. mark open positions to the latest visible close (protective exits fire here)
//! 2. snapshot the portfolio
//! 3. run every symbol's six-phase pipeline concurrently against that snapshot
//! 4. in sorted symbol order: size each decision against the live portfolio and apply it
//! 5. reflect on every trade closed this session
//! 6. record equity and advance the clock
//!
//! Only temporal-wall breaches, reconciliation failures and audit-store
//! failures stop a run. Everything else lands in the decision log.

use crate::config::{ConfigError, RunConfig, RunId};
use crate::data_loader::LoadedData;
use crate::metrics::PerformanceMetrics;
use crate::report::{DecisionLogEntry, LoggedFailure, RunReport, RunStatus, SCHEMA_VERSION};
use quorum_core::agents::AgentRoster;
use quorum_core::clock::{AsOf, ClockError, SimulatedClock};
use quorum_core::data::{DataError, DataManager};
use quorum_core::domain::{Action, ClosedTrade, DecisionId};
use quorum_core::memory::{MemoryError, MemoryStore, ReflectionEngine};
use quorum_core::orchestrator::{AgentOrchestrator, DecisionContext, FailureKind, StepError, StepInputs};
use quorum_core::positions::{PositionError, PositionManager};
use quorum_core::risk::{RiskManager, SizingRequest};
use quorum_core::store::{AuditRecord, AuditStore, InMemoryAuditStore, RecordKind, StoreError};
use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors that stop a run. Anything recoverable is recorded in the
/// decision log instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("data loading failed: {0}")]
    Load(#[from] crate::data_loader::LoadError),

    #[error("temporal wall breached: {0}")]
    Data(#[from] DataError),

    #[error("portfolio invariant violated: {0}")]
    Position(#[from] PositionError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("audit store error: {0}")]
    Audit(#[from] StoreError),

    #[error("clock error: {0}")]
    Clock(ClockError),
}

pub struct BacktestEngine {
    config: RunConfig,
    run_id: RunId,
    orchestrator: AgentOrchestrator,
    risk: RiskManager,
    reflection: ReflectionEngine,
    audit: Arc<dyn AuditStore>,
    cancel: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for BacktestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestEngine")
            .field("run_id", &self.run_id)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

/// Mutable bookkeeping for one run.
struct RunState {
    positions: PositionManager,
    decisions: Vec<DecisionContext>,
    log: Vec<DecisionLogEntry>,
    /// Decision that opened each currently open position.
    entries: HashMap<String, DecisionContext>,
    next_decision: u64,
    sessions: usize,
}

impl BacktestEngine {
    /// Validate the configuration and check that `roster` covers every role
    /// the configured pipeline calls.
    pub fn new(config: RunConfig, roster: AgentRoster) -> Result<Self, ConfigError> {
        config.validate()?;
        let orchestrator = AgentOrchestrator::new(roster, config.orchestrator_config());
        let missing = orchestrator.roster().missing(&orchestrator.required_roles());
        if !missing.is_empty() {
            return Err(ConfigError::MissingRoles(missing));
        }
        Ok(Self {
            run_id: config.run_id()?,
            risk: RiskManager::new(config.risk.clone()),
            reflection: ReflectionEngine::new(config.reflection_settings()),
            orchestrator,
            audit: Arc::new(InMemoryAuditStore::new()),
            cancel: None,
            config,
        })
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = audit;
        self
    }

    /// Stop at the next step boundary (or mid-step, discarding in-flight
    /// decisions) once `true` is sent on the channel.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    /// Replay the loaded calendar. `memory` is read by every pipeline and
    /// receives the lessons of every trade closed during the run.
    pub async fn run(&self, data: &LoadedData, memory: &MemoryStore) -> Result<RunReport, RunError> {
        let mut symbols = self.config.run.symbols.clone();
        symbols.sort();

        let mut clock = SimulatedClock::new(data.calendar.clone());
        let mut state = RunState {
            positions: PositionManager::new(self.config.run.initial_capital, self.config.execution),
            decisions: Vec::new(),
            log: Vec::new(),
            entries: HashMap::new(),
            next_decision: 1,
            sessions: 0,
        };
        let memory_start = memory.len();
        let mut cancel = self.cancel.clone();
        let mut status = RunStatus::Completed;

        info!(
            run_id = %&self.run_id[..12.min(self.run_id.len())],
            symbols = symbols.len(),
            sessions = data.calendar.len(),
            first = %data.calendar.first(),
            last = %data.calendar.last(),
            "backtest started"
        );

        loop {
            if cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                info!(date = %clock.now(), "cancellation requested; stopping before step");
                status = RunStatus::Cancelled;
                break;
            }
            let as_of = clock.as_of();
            let date = as_of.date();

            // 1. mark to market
            let prices = visible_closes(&data.manager, &symbols, as_of)?;
            let exits = state.positions.mark_to_market(&prices, date)?;
            for trade in &exits {
                self.settle(&mut state, trade, as_of, memory)?;
            }

            // 2–3. snapshot, then all symbol pipelines against it
            let snapshot = state.positions.snapshot(date);
            let first_id = state.next_decision;
            state.next_decision += symbols.len() as u64;
            let pipelines = join_all(symbols.iter().enumerate().map(|(i, symbol)| {
                self.orchestrator.run(StepInputs {
                    decision_id: DecisionId(first_id + i as u64),
                    symbol,
                    as_of,
                    data: &data.manager,
                    memory,
                    portfolio: &snapshot,
                })
            }));
            let results = match cancel.as_mut() {
                Some(rx) => tokio::select! {
                    results = pipelines => Some(results),
                    () = cancelled(rx) => None,
                },
                None => Some(pipelines.await),
            };
            let Some(results) = results else {
                warn!(date = %date, "cancelled mid-step; in-flight decisions discarded");
                status = RunStatus::Cancelled;
                break;
            };

            // 4–5. serialization point: fixed symbol order
            for (symbol, result) in symbols.iter().zip(results) {
                match result {
                    Ok(ctx) => self.execute(&mut state, ctx, &prices, as_of, memory)?,
                    Err(StepError::Fatal(e)) => {
                        error!(symbol = %symbol, date = %date, error = %e, "fatal step error; aborting run");
                        return Err(RunError::Data(e));
                    }
                    Err(e @ StepError::Symbol { .. }) => {
                        warn!(symbol = %symbol, date = %date, error = %e, "symbol step failed");
                        let entry = DecisionLogEntry {
                            date,
                            symbol: symbol.clone(),
                            decision_id: None,
                            action: Action::Hold,
                            failures: vec![LoggedFailure {
                                kind: FailureKind::SymbolStepFailure,
                                phase: None,
                                role: None,
                                detail: e.to_string(),
                            }],
                        };
                        self.record(RecordKind::DecisionLog, date, Some(symbol), &entry)?;
                        state.log.push(entry);
                    }
                }
            }

            // 6. equity
            let point = state.positions.record_equity(date);
            self.record(RecordKind::Equity, date, None, &point)?;
            state.sessions += 1;
            info!(
                date = %date,
                equity = point.equity,
                cash = point.cash,
                open_positions = state.positions.state().open_position_count(),
                "step complete"
            );

            match clock.advance() {
                Ok(_) => {}
                Err(ClockError::EndOfRun) => break,
                Err(e) => return Err(RunError::Clock(e)),
            }
        }
        self.audit.flush()?;

        let memories = memory
            .records()
            .into_iter()
            .skip(memory_start)
            .map(|r| r.as_ref().clone())
            .collect::<Vec<_>>();
        let final_portfolio = state.positions.state().clone();
        let metrics = PerformanceMetrics::compute(&final_portfolio.equity_history, state.positions.closed_trades());
        info!(
            status = ?status,
            sessions = state.sessions,
            trades = metrics.trade_count,
            total_return = metrics.total_return,
            lessons = memories.len(),
            "backtest finished"
        );

        Ok(RunReport {
            schema_version: SCHEMA_VERSION,
            run_id: self.run_id.clone(),
            status,
            config: self.config.clone(),
            data: data.summary.clone(),
            sessions_processed: state.sessions,
            equity_curve: final_portfolio.equity_history.clone(),
            fills: state.positions.fills().to_vec(),
            trades: state.positions.closed_trades().to_vec(),
            final_portfolio,
            decisions: state.decisions,
            decision_log: state.log,
            metrics,
            memories,
        })
    }

    /// Size one finished decision against the live portfolio, apply it, and
    /// log the outcome.
    fn execute(
        &self,
        state: &mut RunState,
        ctx: DecisionContext,
        prices: &BTreeMap<String, f64>,
        as_of: AsOf,
        memory: &MemoryStore,
    ) -> Result<(), RunError> {
        let date = as_of.date();
        let symbol = ctx.symbol().to_string();
        let mut failures: Vec<LoggedFailure> = ctx.degradations().iter().map(LoggedFailure::from).collect();
        let mut action = Action::Hold;

        let order = match prices.get(&symbol) {
            Some(&price) => {
                let live = state.positions.snapshot(date);
                match self.risk.size(&SizingRequest::from(&ctx), &live, price) {
                    Ok(order) => order,
                    Err(e) => {
                        warn!(symbol = %symbol, date = %date, proposed = %ctx.action(), error = %e, "risk limit; downgraded to HOLD");
                        failures.push(LoggedFailure {
                            kind: FailureKind::RiskLimitExceeded,
                            phase: None,
                            role: None,
                            detail: e.to_string(),
                        });
                        None
                    }
                }
            }
            None if !ctx.action().is_hold() => {
                warn!(symbol = %symbol, date = %date, "no visible price; decision not executable");
                failures.push(LoggedFailure {
                    kind: FailureKind::InsufficientHistory,
                    phase: None,
                    role: None,
                    detail: format!("no visible close for {symbol} at {}", ctx.cutoff()),
                });
                None
            }
            None => None,
        };

        if let Some(order) = order {
            match state.positions.apply(&order, date) {
                Ok(outcome) => {
                    action = ctx.action();
                    self.record(RecordKind::Fill, date, Some(&symbol), &outcome.fill)?;
                    if !order.reduces_position {
                        state.entries.entry(symbol.clone()).or_insert_with(|| ctx.clone());
                    }
                    if let Some(trade) = &outcome.closed {
                        self.settle(state, trade, as_of, memory)?;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(symbol = %symbol, date = %date, error = %e, "order rejected by position manager");
                    failures.push(LoggedFailure {
                        kind: FailureKind::SymbolStepFailure,
                        phase: None,
                        role: None,
                        detail: e.to_string(),
                    });
                }
            }
        }

        let entry = DecisionLogEntry {
            date,
            symbol: symbol.clone(),
            decision_id: Some(ctx.id()),
            action,
            failures,
        };
        debug!(symbol = %symbol, date = %date, decided = %ctx.action(), executed = %action, "decision settled");
        self.record(RecordKind::Decision, date, Some(&symbol), &ctx)?;
        self.record(RecordKind::DecisionLog, date, Some(&symbol), &entry)?;
        state.log.push(entry);
        state.decisions.push(ctx);
        Ok(())
    }

    /// Audit a closed trade and turn it into lessons.
    fn settle(
        &self,
        state: &mut RunState,
        trade: &ClosedTrade,
        as_of: AsOf,
        memory: &MemoryStore,
    ) -> Result<(), RunError> {
        let date = as_of.date();
        self.record(RecordKind::ClosedTrade, date, Some(&trade.symbol), trade)?;
        let ids = self
            .reflection
            .reflect(trade, state.entries.get(&trade.symbol), as_of, memory)?;
        for id in ids {
            if let Some(record) = memory.get(id) {
                self.record(RecordKind::Memory, date, Some(&trade.symbol), record.as_ref())?;
            }
        }
        if state.positions.state().get_position(&trade.symbol).is_none() {
            state.entries.remove(&trade.symbol);
        }
        Ok(())
    }

    fn record<T: Serialize>(
        &self,
        kind: RecordKind,
        date: NaiveDate,
        symbol: Option<&str>,
        payload: &T,
    ) -> Result<(), RunError> {
        self.audit.append(AuditRecord::new(kind, date, symbol, payload)?)?;
        Ok(())
    }
}

/// Latest visible close per symbol. Symbols with nothing visible yet are
/// skipped; a temporal violation aborts.
fn visible_closes(
    manager: &DataManager,
    symbols: &[String],
    as_of: AsOf,
) -> Result<BTreeMap<String, f64>, RunError> {
    let mut prices = BTreeMap::new();
    for symbol in symbols {
        match manager.latest_close(symbol, as_of) {
            Ok(price) => {
                prices.insert(symbol.clone(), price);
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => debug!(symbol = %symbol, date = %as_of, error = %e, "no visible price"),
        }
    }
    Ok(prices)
}

/// Resolves once `true` has been sent; never resolves if the sender is
/// dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
