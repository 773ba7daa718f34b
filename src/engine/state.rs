//! Flow execution state
//!
//! One [`FlowState`] exists per execution. Handlers only ever read it; the
//! writes they want to make travel back to the engine loop as a
//! [`StateDelta`] and are applied there, one step at a time.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while reading or writing flow state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("field '{field}' was read before any step set it")]
    UninitializedField { field: String },

    #[error("step '{step}' wrote field '{field}' it does not declare")]
    UndeclaredWrite { step: String, field: String },

    #[error("field '{field}' could not be converted: {source}")]
    Serialization {
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    fn serialization(field: &str, source: serde_json::Error) -> Self {
        Self::Serialization {
            field: field.to_string(),
            source,
        }
    }
}

/// Identifier of a single flow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The mutable record shared by all steps of one execution
#[derive(Debug, Clone)]
pub struct FlowState {
    execution_id: ExecutionId,
    fields: BTreeMap<String, Value>,
}

impl FlowState {
    /// Create empty state for an execution
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            fields: BTreeMap::new(),
        }
    }

    /// Create state seeded with kickoff inputs
    pub fn with_inputs(execution_id: ExecutionId, inputs: serde_json::Map<String, Value>) -> Self {
        Self {
            execution_id,
            fields: inputs.into_iter().collect(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Read a field, failing if nothing has written it yet
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, StateError> {
        let value = self.get_value(field)?;
        serde_json::from_value(value.clone()).map_err(|e| StateError::serialization(field, e))
    }

    /// Read a field that may legitimately be absent
    pub fn get_opt<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, StateError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StateError::serialization(field, e)),
        }
    }

    /// Raw JSON value of a field
    pub fn get_value(&self, field: &str) -> Result<&Value, StateError> {
        self.fields
            .get(field)
            .ok_or_else(|| StateError::UninitializedField {
                field: field.to_string(),
            })
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Write a field directly (used for inputs and by tests)
    pub fn set<T: Serialize>(&mut self, field: impl Into<String>, value: T) -> Result<(), StateError> {
        let field = field.into();
        let value = serde_json::to_value(value).map_err(|e| StateError::serialization(&field, e))?;
        self.fields.insert(field, value);
        Ok(())
    }

    /// Apply a step's delta, checking every field against its declared writes
    ///
    /// The check runs before anything is written, so a rejected delta leaves
    /// the state untouched.
    pub fn apply(
        &mut self,
        step: &str,
        declared: &BTreeSet<String>,
        delta: StateDelta,
    ) -> Result<usize, StateError> {
        if let Some((field, _)) = delta.writes.iter().find(|(f, _)| !declared.contains(f)) {
            return Err(StateError::UndeclaredWrite {
                step: step.to_string(),
                field: field.clone(),
            });
        }

        let count = delta.writes.len();
        for (field, value) in delta.writes {
            self.fields.insert(field, value);
        }
        Ok(count)
    }

    /// All fields as a JSON object (used to render prompts)
    pub fn snapshot(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Writes produced by one step invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    writes: Vec<(String, Value)>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write; a later write to the same field wins
    pub fn set<T: Serialize>(&mut self, field: impl Into<String>, value: T) -> Result<(), StateError> {
        let field = field.into();
        let value = serde_json::to_value(value).map_err(|e| StateError::serialization(&field, e))?;
        self.writes.retain(|(f, _)| *f != field);
        self.writes.push((field, value));
        Ok(())
    }

    /// Builder form of [`StateDelta::set`]
    pub fn with<T: Serialize>(mut self, field: impl Into<String>, value: T) -> Result<Self, StateError> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(|(f, _)| f.as_str())
    }
}

/// Lock-guarded handle to an execution's state
///
/// Cloning shares the same underlying state. Only the engine loop takes the
/// write side.
#[derive(Debug, Clone)]
pub struct StateContainer {
    inner: Arc<RwLock<FlowState>>,
}

impl StateContainer {
    pub fn new(state: FlowState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Run a closure against a read guard
    pub fn read<R>(&self, f: impl FnOnce(&FlowState) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut FlowState) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Copy of the current state
    pub fn to_state(&self) -> FlowState {
        self.read(FlowState::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn declared(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_uninitialized_field() {
        let state = FlowState::new(ExecutionId::new());
        let err = state.get::<String>("topic").unwrap_err();
        assert!(matches!(err, StateError::UninitializedField { ref field } if field == "topic"));
    }

    #[test]
    fn test_get_opt_absent_and_null() {
        let mut state = FlowState::new(ExecutionId::new());
        assert_eq!(state.get_opt::<String>("post").unwrap(), None);

        state.set("post", Value::Null).unwrap();
        assert_eq!(state.get_opt::<String>("post").unwrap(), None);
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Card {
            score: u32,
            reason: String,
        }

        let mut state = FlowState::new(ExecutionId::new());
        let card = Card {
            score: 72,
            reason: "thin keywords".into(),
        };
        state.set("score", &card).unwrap();

        assert_eq!(state.get::<Card>("score").unwrap(), card);
        assert!(matches!(
            state.get::<u32>("score"),
            Err(StateError::Serialization { .. })
        ));
    }

    #[test]
    fn test_inputs_seed_state() {
        let inputs = json!({"topic": "robotics", "max_length": 800});
        let state = FlowState::with_inputs(ExecutionId::new(), inputs.as_object().unwrap().clone());

        assert_eq!(state.get::<String>("topic").unwrap(), "robotics");
        assert_eq!(state.get::<u64>("max_length").unwrap(), 800);
    }

    #[test]
    fn test_apply_declared_writes() {
        let mut state = FlowState::new(ExecutionId::new());
        let delta = StateDelta::new()
            .with("post", "draft")
            .unwrap()
            .with("revision", 1)
            .unwrap();

        let written = state
            .apply("make", &declared(&["post", "revision"]), delta)
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(state.get::<u32>("revision").unwrap(), 1);
    }

    #[test]
    fn test_apply_rejects_undeclared_write_atomically() {
        let mut state = FlowState::new(ExecutionId::new());
        let delta = StateDelta::new()
            .with("post", "draft")
            .unwrap()
            .with("score", 99)
            .unwrap();

        let err = state.apply("make", &declared(&["post"]), delta).unwrap_err();

        assert!(matches!(
            err,
            StateError::UndeclaredWrite { ref step, ref field } if step == "make" && field == "score"
        ));
        assert!(!state.contains("post"));
    }

    #[test]
    fn test_delta_last_write_wins() {
        let mut delta = StateDelta::new();
        delta.set("x", 1).unwrap();
        delta.set("x", 2).unwrap();

        let mut state = FlowState::new(ExecutionId::new());
        state.apply("s", &declared(&["x"]), delta).unwrap();
        assert_eq!(state.get::<i32>("x").unwrap(), 2);
    }

    #[test]
    fn test_container_writes_visible_to_clones() {
        let container = StateContainer::new(FlowState::new(ExecutionId::new()));
        let reader = container.clone();

        container.write(|s| s.set("strategy_type", "growth")).unwrap();

        let strategy: String = reader.read(|s| s.get("strategy_type")).unwrap();
        assert_eq!(strategy, "growth");
    }

    #[test]
    fn test_snapshot_is_object() {
        let mut state = FlowState::new(ExecutionId::new());
        state.set("a", 1).unwrap();
        assert_eq!(state.snapshot(), json!({"a": 1}));
    }
}
