//! Append-only, per-role memory of scored past decisions.
//!
//! Every read takes the caller's `AsOf`; records whose trade closed after it
//! are invisible, so a replay can never learn from its own future.

use super::embedding::{cosine, embed};
use crate::agents::AgentRole;
use crate::clock::AsOf;
use crate::domain::{Action, DecisionId, MemoryId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory io error: {0}")]
    Io(#[from] io::Error),

    #[error("memory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reflection was asked to score a trade that closes after the
    /// current decision time.
    #[error("outcome closed at {closed_at} is not yet knowable at {as_of}")]
    FutureOutcome { closed_at: NaiveDate, as_of: NaiveDate },

    #[error("invalid memory record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    Positive,
    Negative,
    Neutral,
}

impl OutcomeLabel {
    /// Returns inside `[-band, band]` are neutral.
    pub fn classify(realized_return: f64, neutral_band: f64) -> Self {
        if realized_return > neutral_band {
            OutcomeLabel::Positive
        } else if realized_return < -neutral_band {
            OutcomeLabel::Negative
        } else {
            OutcomeLabel::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub role: AgentRole,
    pub symbol: String,
    pub decided_at: NaiveDate,
    pub closed_at: NaiveDate,
    pub decision_id: Option<DecisionId>,
    /// The role's own call at decision time.
    pub stance: Action,
    /// Text the record is retrieved by.
    pub situation: String,
    pub lesson: String,
    pub realized_return: f64,
    pub outcome: OutcomeLabel,
    /// Whether the role's call matched the realized direction.
    pub hit: bool,
    #[serde(skip)]
    embedding: Vec<f32>,
}

/// Input to `MemoryStore::append`; the store assigns id and embedding.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub role: AgentRole,
    pub symbol: String,
    pub decided_at: NaiveDate,
    pub closed_at: NaiveDate,
    pub decision_id: Option<DecisionId>,
    pub stance: Action,
    pub situation: String,
    pub lesson: String,
    pub realized_return: f64,
    pub outcome: OutcomeLabel,
    pub hit: bool,
}

/// A recalled record with its retrieval score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub memory_id: MemoryId,
    pub symbol: String,
    pub closed_at: NaiveDate,
    pub stance: Action,
    pub lesson: String,
    pub outcome: OutcomeLabel,
    pub realized_return: f64,
    pub hit: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecallSettings {
    pub top_k: usize,
    /// Recency half-life in calendar days.
    pub half_life_days: f64,
    /// Weight of text similarity; recency gets the remainder.
    pub similarity_weight: f64,
}

impl Default for RecallSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            half_life_days: 30.0,
            similarity_weight: 0.7,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: RecallSettings,
    records: RwLock<Vec<Arc<MemoryRecord>>>,
}

impl MemoryStore {
    pub fn new(settings: RecallSettings) -> Self {
        Self {
            settings,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> RecallSettings {
        self.settings
    }

    /// Append a record and return its id. Ids increase strictly.
    pub fn append(&self, memory: NewMemory) -> Result<MemoryId, MemoryError> {
        if memory.closed_at < memory.decided_at {
            return Err(MemoryError::InvalidRecord(format!(
                "closed {} before decided {}",
                memory.closed_at, memory.decided_at
            )));
        }
        if !memory.realized_return.is_finite() {
            return Err(MemoryError::InvalidRecord("non-finite return".into()));
        }

        let embedding = embed(&memory.situation);
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let id = MemoryId(records.last().map_or(1, |r| r.id.0 + 1));
        records.push(Arc::new(MemoryRecord {
            id,
            role: memory.role,
            symbol: memory.symbol,
            decided_at: memory.decided_at,
            closed_at: memory.closed_at,
            decision_id: memory.decision_id,
            stance: memory.stance,
            situation: memory.situation,
            lesson: memory.lesson,
            realized_return: memory.realized_return,
            outcome: memory.outcome,
            hit: memory.hit,
            embedding,
        }));
        Ok(id)
    }

    /// Top `settings.top_k` lessons for `role` knowable at `as_of`.
    pub fn recall(&self, role: AgentRole, query: &str, as_of: AsOf) -> Vec<Lesson> {
        self.recall_top(role, query, as_of, self.settings.top_k)
    }

    /// Score = w · cosine(query, situation) + (1 − w) · 0.5^(age / half-life).
    /// Equal scores keep insertion order.
    pub fn recall_top(&self, role: AgentRole, query: &str, as_of: AsOf, k: usize) -> Vec<Lesson> {
        if k == 0 {
            return Vec::new();
        }
        let query = embed(query);
        let weight = self.settings.similarity_weight.clamp(0.0, 1.0);
        let half_life = self.settings.half_life_days.max(f64::EPSILON);

        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<(f64, &Arc<MemoryRecord>)> = records
            .iter()
            .filter(|r| r.role == role && r.closed_at <= as_of.date())
            .map(|r| {
                let age = (as_of.date() - r.closed_at).num_days() as f64;
                let recency = 0.5_f64.powf(age / half_life);
                let score = weight * cosine(&query, &r.embedding) + (1.0 - weight) * recency;
                (score, r)
            })
            .collect();
        // stable sort keeps id order among ties
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(score, r)| Lesson {
                memory_id: r.id,
                symbol: r.symbol.clone(),
                closed_at: r.closed_at,
                stance: r.stance,
                lesson: r.lesson.clone(),
                outcome: r.outcome,
                realized_return: r.realized_return,
                hit: r.hit,
                score,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: MemoryId) -> Option<Arc<MemoryRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn records(&self) -> Vec<Arc<MemoryRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn records_for(&self, role: AgentRole) -> Vec<Arc<MemoryRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }

    /// Write all records as JSONL. Written to a temp file then renamed.
    pub fn save_jsonl(&self, path: &Path) -> Result<(), MemoryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("jsonl.tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            for record in self.records() {
                serde_json::to_writer(&mut writer, record.as_ref())?;
                writeln!(writer)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load records written by `save_jsonl`. A missing file yields an empty
    /// store; malformed lines are skipped with a warning.
    pub fn load_jsonl(path: &Path, settings: RecallSettings) -> Result<Self, MemoryError> {
        let store = Self::new(settings);
        if !path.exists() {
            return Ok(store);
        }

        let reader = io::BufReader::new(fs::File::open(path)?);
        let mut loaded: Vec<MemoryRecord> = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(&line) {
                Ok(mut record) => {
                    record.embedding = embed(&record.situation);
                    loaded.push(record);
                }
                Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "skipping malformed memory line"),
            }
        }
        loaded.sort_by_key(|r| r.id);
        loaded.dedup_by_key(|r| r.id);

        *store.records.write().unwrap_or_else(PoisonError::into_inner) =
            loaded.into_iter().map(Arc::new).collect();
        Ok(store)
    }
}
