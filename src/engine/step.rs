//! Step descriptors, handler trait and step-level errors

use super::state::{ExecutionId, FlowState, StateContainer, StateDelta, StateError};
use super::trigger::{Label, Trigger};
use crate::agent::AgentError;
use crate::artifacts::ArtifactError;
use crate::prompt::PromptError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors a step handler can return
#[derive(Debug, Error)]
pub enum StepError {
    /// Bad initial inputs; aborts the execution immediately
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Outcome of a router step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Fire `LabelEmitted(label)`
    Label(Label),
    /// End this branch without firing anything
    Terminate,
}

/// What a handler hands back to the engine
#[derive(Debug, Default)]
pub struct StepOutput {
    pub delta: StateDelta,
    pub route: Option<Route>,
    pub value: Option<Value>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delta(mut self, delta: StateDelta) -> Self {
        self.delta = delta;
        self
    }

    /// Queue a state write
    pub fn set<T: Serialize>(mut self, field: impl Into<String>, value: T) -> Result<Self, StateError> {
        self.delta.set(field, value)?;
        Ok(self)
    }

    /// Route to a label (routers only)
    pub fn route(mut self, label: impl Into<Label>) -> Self {
        self.route = Some(Route::Label(label.into()));
        self
    }

    /// End the branch (routers only)
    pub fn terminate(mut self) -> Self {
        self.route = Some(Route::Terminate);
        self
    }

    /// Expose a value as the flow result if this turns out to be the final step
    pub fn value<T: Serialize>(mut self, value: T) -> Result<Self, StateError> {
        let value = serde_json::to_value(value).map_err(|source| StateError::Serialization {
            field: "<value>".into(),
            source,
        })?;
        self.value = Some(value);
        Ok(self)
    }
}

/// Read-only view handed to a running step
#[derive(Debug, Clone)]
pub struct StepContext {
    step: Arc<str>,
    invocation: u32,
    state: StateContainer,
}

impl StepContext {
    pub(crate) fn new(step: Arc<str>, invocation: u32, state: StateContainer) -> Self {
        Self {
            step,
            invocation,
            state,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step
    }

    /// 1 on the first run of this step, 2 on the second pass of a cycle, ...
    pub fn invocation(&self) -> u32 {
        self.invocation
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.state.read(FlowState::execution_id)
    }

    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, StateError> {
        self.state.read(|s| s.get(field))
    }

    pub fn get_opt<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, StateError> {
        self.state.read(|s| s.get_opt(field))
    }

    pub fn contains(&self, field: &str) -> bool {
        self.state.read(|s| s.contains(field))
    }

    /// All fields as a JSON object
    pub fn snapshot(&self) -> Value {
        self.state.read(FlowState::snapshot)
    }
}

/// Body of a step
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, ctx: StepContext) -> Result<StepOutput, StepError>;
}

#[async_trait]
impl<F, Fut> StepHandler for F
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
{
    async fn call(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        (self)(ctx).await
    }
}

/// A named unit of work with one trigger and one handler
#[derive(Clone)]
pub struct Step {
    name: Arc<str>,
    trigger: Trigger,
    handler: Arc<dyn StepHandler>,
    routes: Option<BTreeSet<Label>>,
    writes: BTreeSet<String>,
    description: Option<String>,
}

impl Step {
    /// Declare a plain step from an async closure or fn
    pub fn new<F, Fut>(name: impl Into<String>, trigger: Trigger, handler: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
    {
        Self::from_handler(name, trigger, handler)
    }

    /// Declare a plain step from any [`StepHandler`]
    pub fn from_handler(
        name: impl Into<String>,
        trigger: Trigger,
        handler: impl StepHandler + 'static,
    ) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            trigger,
            handler: Arc::new(handler),
            routes: None,
            writes: BTreeSet::new(),
            description: None,
        }
    }

    /// Declare a router and the closed set of labels it may emit
    pub fn router<L, F, Fut>(
        name: impl Into<String>,
        trigger: Trigger,
        routes: impl IntoIterator<Item = L>,
        handler: F,
    ) -> Self
    where
        L: Into<Label>,
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
    {
        let mut step = Self::from_handler(name, trigger, handler);
        step.routes = Some(routes.into_iter().map(Into::into).collect());
        step
    }

    /// Declare the state fields this step produces
    pub fn writes<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.writes.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn is_router(&self) -> bool {
        self.routes.is_some()
    }

    /// Declared labels, `None` for plain steps
    pub fn routes(&self) -> Option<&BTreeSet<Label>> {
        self.routes.as_ref()
    }

    pub fn declared_writes(&self) -> &BTreeSet<String> {
        &self.writes
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub(crate) fn handler(&self) -> Arc<dyn StepHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("routes", &self.routes)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::{ExecutionId, FlowState};

    fn context(state: FlowState) -> StepContext {
        StepContext::new(Arc::from("reader"), 1, StateContainer::new(state))
    }

    #[test]
    fn test_output_builder() {
        let output = StepOutput::new()
            .set("score", 85)
            .unwrap()
            .terminate()
            .value("saved.md")
            .unwrap();

        assert_eq!(output.delta.fields().collect::<Vec<_>>(), vec!["score"]);
        assert_eq!(output.route, Some(Route::Terminate));
        assert_eq!(output.value, Some(Value::from("saved.md")));
    }

    #[test]
    fn test_router_declares_routes() {
        let step = Step::router(
            "strategy_router",
            Trigger::on_complete("analyze"),
            ["growth_analysis", "value_analysis"],
            |_ctx: StepContext| async { Ok(StepOutput::new().route("growth_analysis")) },
        );

        assert!(step.is_router());
        assert!(step.routes().unwrap().contains(&Label::from("value_analysis")));
    }

    #[test]
    fn test_writes_accumulate() {
        let step = Step::new("make", Trigger::on_start(), |_ctx: StepContext| async {
            Ok(StepOutput::new())
        })
        .writes(["post"])
        .writes(["revision"]);

        assert_eq!(step.declared_writes().len(), 2);
        assert!(!step.is_router());
    }

    #[tokio::test]
    async fn test_closure_handler_reads_context() {
        let mut state = FlowState::new(ExecutionId::new());
        state.set("topic", "robotics").unwrap();

        let step = Step::new("echo", Trigger::on_start(), |ctx: StepContext| async move {
            let topic: String = ctx.get("topic")?;
            Ok(StepOutput::new().value(format!("{} #{}", topic, ctx.invocation()))?)
        });

        let output = step.handler().call(context(state)).await.unwrap();
        assert_eq!(output.value, Some(Value::from("robotics #1")));
    }

    #[tokio::test]
    async fn test_uninitialized_read_surfaces_as_state_error() {
        let step = Step::new("reader", Trigger::on_start(), |ctx: StepContext| async move {
            let _: String = ctx.get("missing")?;
            Ok(StepOutput::new())
        });

        let err = step
            .handler()
            .call(context(FlowState::new(ExecutionId::new())))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::State(StateError::UninitializedField { .. })
        ));
    }
}
