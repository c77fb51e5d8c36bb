//! Run report and artifact export.
//!
//! A finished (or cancelled) run produces one `RunReport`. It serializes to
//! `report.json`; the realized-trade log is also written as `trades.csv`
//! and the equity curve as `equity.csv` for external tools.

use crate::config::{RunConfig, RunId};
use crate::metrics::PerformanceMetrics;
use chrono::NaiveDate;
use quorum_core::agents::AgentRole;
use quorum_core::data::PrefetchSummary;
use quorum_core::domain::{Action, ClosedTrade, DecisionId, EquityPoint, Fill, PortfolioState};
use quorum_core::memory::MemoryRecord;
use quorum_core::orchestrator::{DecisionContext, Degradation, FailureKind, Phase};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current schema version for `report.json`.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unsupported report schema version {found} (max supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stopped by a cancellation signal; every step before it is complete.
    Cancelled,
}

/// One failure attached to a decision-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedFailure {
    pub kind: FailureKind,
    pub phase: Option<Phase>,
    pub role: Option<AgentRole>,
    pub detail: String,
}

impl From<&Degradation> for LoggedFailure {
    fn from(d: &Degradation) -> Self {
        Self {
            kind: d.kind,
            phase: Some(d.phase),
            role: d.role,
            detail: d.detail.clone(),
        }
    }
}

/// Outcome of one (symbol, step), degraded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub date: NaiveDate,
    pub symbol: String,
    /// `None` when the step failed before producing a context.
    pub decision_id: Option<DecisionId>,
    /// Action the portfolio acted on; HOLD for failed or downgraded steps.
    pub action: Action,
    pub failures: Vec<LoggedFailure>,
}

impl DecisionLogEntry {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn has(&self, kind: FailureKind) -> bool {
        self.failures.iter().any(|f| f.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub status: RunStatus,
    pub config: RunConfig,
    pub data: PrefetchSummary,
    pub sessions_processed: usize,
    pub final_portfolio: PortfolioState,
    pub decisions: Vec<DecisionContext>,
    pub decision_log: Vec<DecisionLogEntry>,
    pub fills: Vec<Fill>,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    /// Memory records appended during this run.
    pub memories: Vec<MemoryRecord>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl RunReport {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map_or(self.config.run.initial_capital, |p| p.equity)
    }

    /// Decision-log entries that carry at least one failure.
    pub fn degraded_steps(&self) -> impl Iterator<Item = &DecisionLogEntry> {
        self.decision_log.iter().filter(|e| !e.is_clean())
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ReportError> {
        let report: RunReport = serde_json::from_str(json)?;
        if report.schema_version > SCHEMA_VERSION {
            return Err(ReportError::UnsupportedSchema {
                found: report.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(report)
    }

    /// Realized-trade log as CSV.
    pub fn trades_csv(&self) -> Result<String, ReportError> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record([
            "symbol",
            "side",
            "entry_date",
            "entry_price",
            "exit_date",
            "exit_price",
            "exit_reason",
            "quantity",
            "gross_pnl",
            "commission",
            "net_pnl",
            "return_pct",
            "sessions_held",
            "entry_decision",
            "exit_decision",
        ])?;
        for t in &self.trades {
            wtr.write_record([
                t.symbol.clone(),
                format!("{:?}", t.side),
                t.entry_date.to_string(),
                format!("{:.6}", t.entry_price),
                t.exit_date.to_string(),
                format!("{:.6}", t.exit_price),
                format!("{:?}", t.exit_reason),
                format!("{}", t.quantity),
                format!("{:.2}", t.gross_pnl),
                format!("{:.2}", t.commission),
                format!("{:.2}", t.net_pnl),
                format!("{:.6}", t.return_pct()),
                t.sessions_held.to_string(),
                t.entry_decision.map(|d| d.to_string()).unwrap_or_default(),
                t.exit_decision.map(|d| d.to_string()).unwrap_or_default(),
            ])?;
        }
        csv_string(wtr)
    }

    pub fn equity_csv(&self) -> Result<String, ReportError> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(["date", "cash", "equity", "realized_pnl", "unrealized_pnl"])?;
        for p in &self.equity_curve {
            wtr.write_record([
                p.date.to_string(),
                format!("{:.2}", p.cash),
                format!("{:.2}", p.equity),
                format!("{:.2}", p.realized_pnl),
                format!("{:.2}", p.unrealized_pnl),
            ])?;
        }
        csv_string(wtr)
    }

    /// Write `report.json`, `trades.csv` and `equity.csv` under `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), ReportError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        for (name, body) in [
            ("report.json", self.to_json()?),
            ("trades.csv", self.trades_csv()?),
            ("equity.csv", self.equity_csv()?),
        ] {
            let path = dir.join(name);
            fs::write(&path, body).map_err(io_err(&path))?;
        }
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, ReportError> {
        let path = dir.join("report.json");
        let json = fs::read_to_string(&path).map_err(io_err(&path))?;
        Self::from_json(&json)
    }

    /// Short Markdown summary for terminals and PR comments.
    pub fn summary_markdown(&self) -> String {
        let m = &self.metrics;
        let run = &self.config.run;
        let mut md = String::with_capacity(1024);
        md.push_str("# Backtest Report\n\n");
        md.push_str("| Field | Value |\n| --- | --- |\n");
        md.push_str(&format!("| Run | `{}` |\n", &self.run_id[..self.run_id.len().min(12)]));
        md.push_str(&format!("| Status | {:?} |\n", self.status));
        md.push_str(&format!("| Symbols | {} |\n", run.symbols.join(", ")));
        md.push_str(&format!("| Period | {} to {} |\n", run.start, run.end));
        md.push_str(&format!("| Sessions | {} |\n", self.sessions_processed));
        md.push_str(&format!("| Initial capital | {:.2} |\n", run.initial_capital));
        md.push_str(&format!("| Final equity | {:.2} |\n", self.final_equity()));
        md.push_str(&format!("| Total return | {:.2}% |\n", m.total_return * 100.0));
        md.push_str(&format!("| Max drawdown | {:.2}% |\n", m.max_drawdown * 100.0));
        md.push_str(&format!("| Sharpe | {:.2} |\n", m.sharpe));
        md.push_str(&format!("| Trades | {} |\n", m.trade_count));
        md.push_str(&format!("| Win rate | {:.1}% |\n", m.win_rate * 100.0));
        md.push_str(&format!("| Profit factor | {:.2} |\n", m.profit_factor));
        md.push_str(&format!("| Degraded steps | {} |\n", self.degraded_steps().count()));
        md.push_str(&format!("| Lessons recorded | {} |\n", self.memories.len()));
        md
    }
}

fn csv_string(wtr: csv::Writer<Vec<u8>>) -> Result<String, ReportError> {
    let data = wtr
        .into_inner()
        .map_err(|e| ReportError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::domain::{ExitReason, PositionSide};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn report() -> RunReport {
        let config = RunConfig::new(10_000.0, d(2024, 1, 2), d(2024, 1, 4), vec!["SPY".into()]);
        let trade = ClosedTrade {
            symbol: "SPY".into(),
            side: PositionSide::Long,
            entry_date: d(2024, 1, 2),
            entry_price: 100.0,
            entry_decision: Some(DecisionId(1)),
            exit_date: d(2024, 1, 4),
            exit_price: 110.0,
            exit_decision: Some(DecisionId(3)),
            exit_reason: ExitReason::Decision,
            quantity: 10.0,
            gross_pnl: 100.0,
            commission: 0.0,
            net_pnl: 100.0,
            sessions_held: 2,
        };
        let equity_curve: Vec<EquityPoint> = [(2, 10_000.0), (3, 10_100.0), (4, 10_100.0)]
            .into_iter()
            .map(|(day, equity)| EquityPoint {
                date: d(2024, 1, day),
                cash: equity,
                equity,
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
            })
            .collect();
        let decision_log = vec![
            DecisionLogEntry {
                date: d(2024, 1, 2),
                symbol: "SPY".into(),
                decision_id: Some(DecisionId(1)),
                action: Action::Buy,
                failures: vec![],
            },
            DecisionLogEntry {
                date: d(2024, 1, 3),
                symbol: "SPY".into(),
                decision_id: Some(DecisionId(2)),
                action: Action::Hold,
                failures: vec![LoggedFailure {
                    kind: FailureKind::AgentTimeout,
                    phase: Some(Phase::Analysis),
                    role: Some(AgentRole::NewsAnalyst),
                    detail: "timed out".into(),
                }],
            },
        ];
        RunReport {
            schema_version: SCHEMA_VERSION,
            run_id: config.run_id().unwrap(),
            status: RunStatus::Completed,
            data: PrefetchSummary::default(),
            sessions_processed: 3,
            final_portfolio: PortfolioState::new(10_100.0),
            decisions: vec![],
            decision_log,
            fills: vec![],
            metrics: PerformanceMetrics::compute(&equity_curve, std::slice::from_ref(&trade)),
            trades: vec![trade],
            equity_curve,
            memories: vec![],
            config,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let original = report();
        original.save(dir.path()).unwrap();

        for name in ["report.json", "trades.csv", "equity.csv"] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
        let loaded = RunReport::load(dir.path()).unwrap();
        assert_eq!(loaded.run_id, original.run_id);
        assert_eq!(loaded.trades.len(), 1);
        assert_eq!(loaded.decision_log, original.decision_log);
        assert_eq!(loaded.metrics, original.metrics);
        assert_eq!(loaded.final_equity(), 10_100.0);
    }

    #[test]
    fn trades_csv_has_header_and_one_row_per_trade() {
        let csv = report().trades_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("symbol,side,entry_date"));
        assert!(lines[1].starts_with("SPY,Long,2024-01-02"));
        assert!(lines[1].ends_with("D000001,D000003"));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut r = report();
        r.schema_version = SCHEMA_VERSION + 1;
        let json = r.to_json().unwrap();
        assert!(matches!(
            RunReport::from_json(&json),
            Err(ReportError::UnsupportedSchema { .. })
        ));
    }

    #[test]
    fn summary_counts_degraded_steps() {
        let r = report();
        assert_eq!(r.degraded_steps().count(), 1);
        let md = r.summary_markdown();
        assert!(md.contains("| Degraded steps | 1 |"));
        assert!(md.contains("| Final equity | 10100.00 |"));
    }
}
