//! Run configuration: one TOML document, validated before any simulated step
//! and immutable for the run.

use chrono::NaiveDate;
use quorum_core::agents::AgentRole;
use quorum_core::memory::{RecallSettings, ReflectionSettings};
use quorum_core::orchestrator::{DebateSettings, OrchestratorConfig};
use quorum_core::positions::FillModel;
use quorum_core::risk::RiskLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Content-addressed run identifier (BLAKE3 hex of the canonical JSON config).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no agent registered for roles: {0:?}")]
    MissingRoles(Vec<AgentRole>),

    #[error("failed to fingerprint config: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub run: RunSection,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub debate: DebateSettings,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub execution: FillModel,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub memory: MemorySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    pub initial_capital: f64,
    /// First simulated session (inclusive).
    pub start: NaiveDate,
    /// Last simulated session (inclusive).
    pub end: NaiveDate,
    pub symbols: Vec<String>,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Publication delay: data stamped after `as_of - lag_days` is invisible.
    pub lag_days: u32,
    /// Calendar days loaded before `start` so indicators are warm on day one.
    pub warmup_days: u32,
    pub source: SourceConfig,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            lag_days: 0,
            warmup_days: 120,
            source: SourceConfig::Synthetic { start_price: 100.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// `{dir}/{SYMBOL}.csv`
    Csv { dir: PathBuf },
    /// `{dir}/{SYMBOL}.parquet`
    Parquet { dir: PathBuf },
    /// Seeded random walk; uses `run.seed`.
    Synthetic {
        #[serde(default = "default_start_price")]
        start_price: f64,
    },
}

fn default_start_price() -> f64 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub analysts: Vec<AgentRole>,
    pub timeout_ms: u64,
    /// Force HOLD when no analyst produced a report.
    pub hold_without_signal: bool,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            analysts: AgentRole::ANALYSTS.to_vec(),
            timeout_ms: 30_000,
            hold_without_signal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub top_k: usize,
    pub half_life_days: f64,
    pub similarity_weight: f64,
    /// Roles that receive a lesson for every closed trade.
    pub reflect_roles: Vec<AgentRole>,
    pub neutral_band: f64,
    /// JSONL file loaded at start and rewritten at the end of the run.
    pub path: Option<PathBuf>,
}

impl Default for MemorySection {
    fn default() -> Self {
        let recall = RecallSettings::default();
        let reflection = ReflectionSettings::default();
        Self {
            top_k: recall.top_k,
            half_life_days: recall.half_life_days,
            similarity_weight: recall.similarity_weight,
            reflect_roles: reflection.roles,
            neutral_band: reflection.neutral_band,
            path: None,
        }
    }
}

impl RunConfig {
    /// Minimal configuration over synthetic data with every default applied.
    pub fn new(initial_capital: f64, start: NaiveDate, end: NaiveDate, symbols: Vec<String>) -> Self {
        Self {
            run: RunSection {
                initial_capital,
                start,
                end,
                symbols,
                seed: default_seed(),
            },
            data: DataSection::default(),
            debate: DebateSettings::default(),
            risk: RiskLimits::default(),
            execution: FillModel::default(),
            agents: AgentsSection::default(),
            memory: MemorySection::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Deterministic fingerprint: identical configs share a run id.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        // field order is fixed by the struct definitions, so the JSON is canonical
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    /// Reject anything that would make the run meaningless or unsafe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let run = &self.run;
        if !(run.initial_capital.is_finite() && run.initial_capital > 0.0) {
            return Err(invalid("run.initial_capital", format!("must be positive, got {}", run.initial_capital)));
        }
        if run.start > run.end {
            return Err(invalid("run.start", format!("{} is after end {}", run.start, run.end)));
        }
        if run.symbols.is_empty() {
            return Err(invalid("run.symbols", "at least one symbol is required"));
        }
        let mut seen = BTreeSet::new();
        for symbol in &run.symbols {
            if symbol.trim().is_empty() || symbol.trim() != symbol {
                return Err(invalid("run.symbols", format!("malformed symbol '{symbol}'")));
            }
            if !seen.insert(symbol) {
                return Err(invalid("run.symbols", format!("duplicate symbol '{symbol}'")));
            }
        }

        if let SourceConfig::Synthetic { start_price } = self.data.source {
            if !(start_price.is_finite() && start_price > 0.0) {
                return Err(invalid("data.source.start_price", "must be positive"));
            }
        }

        if self.debate.max_debate_rounds == 0 {
            return Err(invalid("debate.max_debate_rounds", "must be at least 1"));
        }
        if self.debate.max_risk_rounds == 0 {
            return Err(invalid("debate.max_risk_rounds", "must be at least 1"));
        }

        let risk = &self.risk;
        if !(risk.max_position_fraction > 0.0 && risk.max_position_fraction <= 1.0) {
            return Err(invalid("risk.max_position_fraction", "must be in (0, 1]"));
        }
        if risk.max_open_positions == 0 {
            return Err(invalid("risk.max_open_positions", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&risk.min_confidence) {
            return Err(invalid("risk.min_confidence", "must be in [0, 1]"));
        }
        for (field, pct) in [
            ("risk.default_stop_loss_pct", risk.default_stop_loss_pct),
            ("risk.default_take_profit_pct", risk.default_take_profit_pct),
        ] {
            if let Some(p) = pct.filter(|p| !(p.is_finite() && *p > 0.0)) {
                return Err(invalid(field, format!("must be positive, got {p}")));
            }
        }

        if !(self.execution.slippage_bps.is_finite() && self.execution.slippage_bps >= 0.0) {
            return Err(invalid("execution.slippage_bps", "must be non-negative"));
        }
        if !(self.execution.commission_per_trade.is_finite() && self.execution.commission_per_trade >= 0.0) {
            return Err(invalid("execution.commission_per_trade", "must be non-negative"));
        }

        let agents = &self.agents;
        if agents.analysts.is_empty() {
            return Err(invalid("agents.analysts", "at least one analyst is required"));
        }
        if let Some(role) = agents.analysts.iter().find(|r| !r.is_analyst()) {
            return Err(invalid("agents.analysts", format!("{role} is not an analyst role")));
        }
        let mut seen = BTreeSet::new();
        if let Some(role) = agents.analysts.iter().find(|r| !seen.insert(**r)) {
            return Err(invalid("agents.analysts", format!("{role} is listed more than once")));
        }
        if agents.timeout_ms == 0 {
            return Err(invalid("agents.timeout_ms", "must be positive"));
        }

        let memory = &self.memory;
        if !(memory.half_life_days.is_finite() && memory.half_life_days > 0.0) {
            return Err(invalid("memory.half_life_days", "must be positive"));
        }
        if !(0.0..=1.0).contains(&memory.similarity_weight) {
            return Err(invalid("memory.similarity_weight", "must be in [0, 1]"));
        }
        if !(memory.neutral_band.is_finite() && memory.neutral_band >= 0.0) {
            return Err(invalid("memory.neutral_band", "must be non-negative"));
        }
        Ok(())
    }

    /// First date prefetched: `start` minus the warmup allowance.
    pub fn fetch_start(&self) -> NaiveDate {
        self.run.start - chrono::Duration::days(i64::from(self.data.warmup_days))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            analysts: self.agents.analysts.clone(),
            agent_timeout: Duration::from_millis(self.agents.timeout_ms),
            debate: self.debate,
            hold_without_signal: self.agents.hold_without_signal,
            memory_top_k: self.memory.top_k,
        }
    }

    pub fn recall_settings(&self) -> RecallSettings {
        RecallSettings {
            top_k: self.memory.top_k,
            half_life_days: self.memory.half_life_days,
            similarity_weight: self.memory.similarity_weight,
        }
    }

    pub fn reflection_settings(&self) -> ReflectionSettings {
        ReflectionSettings {
            roles: self.memory.reflect_roles.clone(),
            neutral_band: self.memory.neutral_band,
        }
    }
}
