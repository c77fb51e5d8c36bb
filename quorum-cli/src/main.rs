//! Quorum CLI: run, validate, and inspect multi-agent backtests.
//!
//! Commands:
//! - `run`: execute a backtest from a TOML config file and save the report
//! - `validate`: parse and validate a config without running it
//! - `report`: print the summary of a saved report directory
//! - `memory list`: list the records of a persisted memory store

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quorum_core::agents::{AgentRole, AgentRoster, HeuristicAgent};
use quorum_core::memory::{MemoryStore, RecallSettings};
use quorum_core::store::JsonlAuditStore;
use quorum_runner::{run_backtest, RunConfig, RunOptions, RunReport, RunStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quorum", about = "Quorum CLI: multi-agent trading backtester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for report.json, trades.csv and equity.csv.
        #[arg(long, default_value = "results")]
        out: PathBuf,

        /// Memory store to load before and save after the run (overrides `[memory].path`).
        #[arg(long)]
        memory: Option<PathBuf>,

        /// Also write every decision, fill and lesson to `<out>/audit.jsonl`.
        #[arg(long, default_value_t = false)]
        audit: bool,
    },
    /// Parse and validate a config file.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the summary of a saved report.
    Report {
        /// Directory containing report.json.
        dir: PathBuf,
    },
    /// Memory store commands.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List stored lessons, newest first.
    List {
        /// Path to a memory JSONL file.
        path: PathBuf,

        /// Only show records for this role (e.g. trader, risk_manager).
        #[arg(long)]
        role: Option<AgentRole>,

        /// Only show records whose outcome closed on or before this date.
        #[arg(long)]
        before: Option<NaiveDate>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            out,
            memory,
            audit,
        } => run_cmd(&config, &out, memory, audit).await,
        Commands::Validate { config } => validate_cmd(&config),
        Commands::Report { dir } => report_cmd(&dir),
        Commands::Memory { action } => match action {
            MemoryAction::List {
                path,
                role,
                before,
                limit,
            } => memory_list_cmd(&path, role, before, limit),
        },
    }
}

async fn run_cmd(config_path: &Path, out: &Path, memory: Option<PathBuf>, audit: bool) -> Result<()> {
    let mut config = RunConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if memory.is_some() {
        config.memory.path = memory;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current step");
            let _ = cancel_tx.send(true);
        }
    });

    let mut options = RunOptions {
        cancel: Some(cancel_rx),
        ..RunOptions::default()
    };
    if audit {
        std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
        options.audit = Some(Arc::new(JsonlAuditStore::open(out.join("audit.jsonl"))?));
    }

    let roster = AgentRoster::uniform(Arc::new(HeuristicAgent::new()));
    let report = run_backtest(config, roster, options).await?;
    report.save(out)?;

    println!("{}", report.summary_markdown());
    println!("Artifacts saved to: {}", out.display());
    if report.status == RunStatus::Cancelled {
        info!(sessions = report.sessions_processed, "run was cancelled; partial report saved");
    }
    Ok(())
}

fn validate_cmd(config_path: &Path) -> Result<()> {
    let config = RunConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let run_id = config.run_id()?;
    println!("Config OK: {}", config_path.display());
    println!("  run id:   {run_id}");
    println!("  symbols:  {}", config.run.symbols.join(", "));
    println!("  period:   {} to {}", config.run.start, config.run.end);
    println!(
        "  debate:   {} investment / {} risk rounds",
        config.debate.max_debate_rounds, config.debate.max_risk_rounds
    );
    println!("  lag:      {} day(s)", config.data.lag_days);
    Ok(())
}

fn report_cmd(dir: &Path) -> Result<()> {
    let report = RunReport::load(dir).with_context(|| format!("loading report from {}", dir.display()))?;
    println!("{}", report.summary_markdown());
    let degraded: Vec<_> = report.degraded_steps().collect();
    if !degraded.is_empty() {
        println!("\n## Degraded steps\n");
        for entry in degraded.iter().take(20) {
            let kinds: Vec<String> = entry.failures.iter().map(|f| f.kind.to_string()).collect();
            println!("- {} {} {}: {}", entry.date, entry.symbol, entry.action, kinds.join(", "));
        }
        if degraded.len() > 20 {
            println!("- ... and {} more", degraded.len() - 20);
        }
    }
    Ok(())
}

fn memory_list_cmd(path: &Path, role: Option<AgentRole>, before: Option<NaiveDate>, limit: usize) -> Result<()> {
    if !path.exists() {
        bail!("memory store not found: {}", path.display());
    }
    let store = MemoryStore::load_jsonl(path, RecallSettings::default())?;
    let mut records = match role {
        Some(role) => store.records_for(role),
        None => store.records(),
    };
    if let Some(before) = before {
        records.retain(|r| r.closed_at <= before);
    }
    records.sort_by(|a, b| b.closed_at.cmp(&a.closed_at).then(b.id.cmp(&a.id)));

    println!("{} record(s) in {}", records.len(), path.display());
    for record in records.iter().take(limit) {
        println!(
            "{} {} {:<20} {:<5} {:+.2}% {:?}\n    {}",
            record.id,
            record.closed_at,
            record.role.as_str(),
            record.symbol,
            record.realized_return * 100.0,
            record.outcome,
            record.lesson
        );
    }
    Ok(())
}
