//! Backtest runner: wires configuration, data loading, memory persistence
//! and the engine together.
//!
//! Two entry points:
//! - `run_backtest()`: resolves the configured source, loads, runs. Used by the CLI.
//! - `run_backtest_from_data()`: takes pre-loaded data and a memory store. Used by
//!   tests and by callers that run several rosters over the same data.

use std::path::Path;
use std::sync::Arc;

use quorum_core::agents::AgentRoster;
use quorum_core::memory::MemoryStore;
use quorum_core::store::AuditStore;
use tokio::sync::watch;
use tracing::info;

use crate::config::RunConfig;
use crate::data_loader::{load_market_data, open_source, LoadedData};
use crate::engine::{BacktestEngine, RunError};
use crate::report::RunReport;

/// Optional knobs for a run beyond the configuration file.
#[derive(Default)]
pub struct RunOptions {
    pub audit: Option<Arc<dyn AuditStore>>,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("audit", &self.audit.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// Open the memory store named by `[memory].path`, or start an empty one.
pub fn open_memory(config: &RunConfig) -> Result<MemoryStore, RunError> {
    let settings = config.recall_settings();
    match &config.memory.path {
        Some(path) if path.exists() => {
            let store = MemoryStore::load_jsonl(path, settings)?;
            info!(path = %path.display(), records = store.len(), "memory store loaded");
            Ok(store)
        }
        _ => Ok(MemoryStore::new(settings)),
    }
}

/// Load data, run, and persist the memory store back to `[memory].path`.
pub async fn run_backtest(
    config: RunConfig,
    roster: AgentRoster,
    options: RunOptions,
) -> Result<RunReport, RunError> {
    config.validate()?;
    let source = open_source(&config)?;
    let data = load_market_data(&config, source.as_ref())?;
    let memory = open_memory(&config)?;
    let memory_path = config.memory.path.clone();

    let report = run_backtest_from_data(config, roster, &data, &memory, options).await?;

    if let Some(path) = memory_path {
        save_memory(&memory, &path)?;
    }
    Ok(report)
}

/// Run over data that is already loaded.
pub async fn run_backtest_from_data(
    config: RunConfig,
    roster: AgentRoster,
    data: &LoadedData,
    memory: &MemoryStore,
    options: RunOptions,
) -> Result<RunReport, RunError> {
    let mut engine = BacktestEngine::new(config, roster)?;
    if let Some(audit) = options.audit {
        engine = engine.with_audit(audit);
    }
    if let Some(cancel) = options.cancel {
        engine = engine.with_cancellation(cancel);
    }
    engine.run(data, memory).await
}

fn save_memory(memory: &MemoryStore, path: &Path) -> Result<(), RunError> {
    memory.save_jsonl(path)?;
    info!(path = %path.display(), records = memory.len(), "memory store saved");
    Ok(())
}
