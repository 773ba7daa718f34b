//! Append-only event log for one execution

use super::state::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A step's handler returned and its writes were applied
    StepCompleted,
    /// A router chose a label
    LabelEmitted,
}

/// A fired event; never modified once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the execution's log, starting at 0
    pub seq: u64,
    pub kind: EventKind,
    /// Step name for completions, label for emissions
    pub name: String,
    pub execution_id: ExecutionId,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn is_completion_of(&self, step: &str) -> bool {
        self.kind == EventKind::StepCompleted && self.name == step
    }

    pub fn is_label(&self, label: &str) -> bool {
        self.kind == EventKind::LabelEmitted && self.name == label
    }
}

/// Records events in the order their producing steps complete
#[derive(Debug)]
pub struct EventBus {
    execution_id: ExecutionId,
    log: Vec<Event>,
}

impl EventBus {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            log: Vec::new(),
        }
    }

    /// Append an event and hand back a copy for the evaluator
    pub fn append(&mut self, kind: EventKind, name: impl Into<String>) -> Event {
        let event = Event {
            seq: self.log.len() as u64,
            kind,
            name: name.into(),
            execution_id: self.execution_id,
            at: Utc::now(),
        };
        tracing::trace!(seq = event.seq, kind = ?event.kind, name = %event.name, "Event appended");
        self.log.push(event.clone());
        event
    }

    pub fn log(&self) -> &[Event] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// How many times an event of this kind and name has fired
    pub fn occurrences(&self, kind: EventKind, name: &str) -> usize {
        self.log
            .iter()
            .filter(|e| e.kind == kind && e.name == name)
            .count()
    }

    pub fn into_log(self) -> Vec<Event> {
        self.log
    }
}
