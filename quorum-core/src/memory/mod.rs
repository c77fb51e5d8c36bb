//! Cross-step learning: scored lessons from closed trades, recalled by role.

pub mod embedding;
pub mod reflection;
pub mod store;

pub use reflection::{ReflectionEngine, ReflectionSettings};
pub use store::{
    Lesson, MemoryError, MemoryRecord, MemoryStore, NewMemory, OutcomeLabel, RecallSettings,
};
