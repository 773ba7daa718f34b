//! Lifecycle notifications emitted while a flow runs

use super::state::ExecutionId;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Progress notification for presentation layers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    FlowStarted {
        flow: String,
        execution_id: ExecutionId,
    },
    StepStarted {
        step: String,
        invocation: u32,
    },
    StepFinished {
        step: String,
        invocation: u32,
        #[serde(serialize_with = "serialize_ms")]
        duration: Duration,
        success: bool,
    },
    LabelEmitted {
        step: String,
        label: String,
    },
    BranchTerminated {
        step: String,
    },
    FlowFinished {
        flow: String,
        success: bool,
        value: Option<Value>,
        #[serde(serialize_with = "serialize_ms")]
        duration: Duration,
    },
}

pub(crate) fn serialize_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Receives [`EngineEvent`]s from the engine loop
pub trait FlowObserver: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FlowObserver for NoopObserver {
    fn on_event(&self, _event: &EngineEvent) {}
}

/// Observer that keeps every event, for inspection after a run
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FlowObserver for RecordingObserver {
    fn on_event(&self, event: &EngineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_tagged() {
        let event = EngineEvent::StepFinished {
            step: "manage_seo".into(),
            invocation: 2,
            duration: Duration::from_millis(1500),
            success: true,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "step_finished");
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["invocation"], 2);
    }

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.on_event(&EngineEvent::BranchTerminated { step: "a".into() });
        observer.on_event(&EngineEvent::BranchTerminated { step: "b".into() });

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], EngineEvent::BranchTerminated { step: "b".into() });
    }
}
