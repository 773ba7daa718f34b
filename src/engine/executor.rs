//! Execution engine - the scheduler loop driving one flow execution

use super::event::{Event, EventBus, EventKind};
use super::flow::Flow;
use super::observer::{EngineEvent, FlowObserver, NoopObserver};
use super::state::{ExecutionId, FlowState, StateContainer, StateError};
use super::step::{Route, StepContext, StepError, StepOutput};
use super::trigger::TriggerEvaluator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tracing::Instrument;

/// Errors that end an execution
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid kickoff inputs: {0}")]
    InvalidInputs(String),

    #[error("step '{step}' rejected its inputs: {message}")]
    Validation { step: String, message: String },

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("step '{step}' panicked: {message}")]
    StepPanicked { step: String, message: String },

    #[error("step '{step}' was cancelled: {message}")]
    StepAborted { step: String, message: String },

    #[error("router '{step}' emitted undeclared label '{label}'")]
    UndeclaredRoute { step: String, label: String },

    #[error("step '{step}' returned a route but is not a router")]
    UnexpectedRoute { step: String },

    #[error("state error in step '{step}': {source}")]
    State {
        step: String,
        #[source]
        source: StateError,
    },
}

impl FlowError {
    /// Name of the step that caused the failure, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::InvalidInputs(_) => None,
            Self::Validation { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepPanicked { step, .. }
            | Self::StepAborted { step, .. }
            | Self::UndeclaredRoute { step, .. }
            | Self::UnexpectedRoute { step }
            | Self::State { step, .. } => Some(step),
        }
    }
}

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Engine tuning
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Upper bound on concurrently running handlers; `None` means unbounded
    pub max_concurrent_steps: Option<usize>,
}

/// One finished invocation of a step
#[derive(Debug, Clone, Serialize)]
pub struct StepRun {
    pub step: String,
    pub invocation: u32,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "super::observer::serialize_ms")]
    pub duration: Duration,
    /// Label emitted by a router, if any
    pub label: Option<String>,
}

/// Result of a completed execution
#[derive(Debug)]
pub struct FlowOutcome {
    pub execution_id: ExecutionId,
    pub flow: String,
    pub status: ExecutionStatus,
    /// Value exposed by the last step that exposed one
    pub value: Option<Value>,
    pub final_step: Option<String>,
    pub state: FlowState,
    pub events: Vec<Event>,
    pub runs: Vec<StepRun>,
    pub duration: Duration,
}

impl FlowOutcome {
    /// How many times a step ran
    pub fn runs_of(&self, step: &str) -> usize {
        self.runs.iter().filter(|r| r.step == step).count()
    }

    pub fn ran(&self, step: &str) -> bool {
        self.runs_of(step) > 0
    }

    /// Step names in completion order
    pub fn order(&self) -> Vec<&str> {
        self.runs.iter().map(|r| r.step.as_str()).collect()
    }

    /// Deserialize the flow value
    pub fn value_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.value
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Runs flows
#[derive(Clone)]
pub struct Engine {
    options: EngineOptions,
    observer: Arc<dyn FlowObserver>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Execute `flow` once, seeding state with `inputs`
    ///
    /// `inputs` must serialize to a JSON object (or unit/null for no inputs).
    pub async fn kickoff<I: Serialize>(
        &self,
        flow: &Flow,
        inputs: I,
    ) -> Result<FlowOutcome, FlowError> {
        let inputs = match serde_json::to_value(inputs)
            .map_err(|e| FlowError::InvalidInputs(e.to_string()))?
        {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(FlowError::InvalidInputs(format!(
                    "expected an object, got {}",
                    other
                )));
            }
        };

        let execution_id = ExecutionId::new();
        let span = tracing::info_span!("flow", flow = flow.name(), execution_id = %execution_id);
        Execution::new(self, flow, execution_id, inputs)
            .run()
            .instrument(span)
            .await
    }
}

enum TaskResult {
    Finished(Result<StepOutput, StepError>),
    Panicked(String),
}

struct Finished {
    idx: usize,
    invocation: u32,
    started_at: DateTime<Utc>,
    duration: Duration,
    result: TaskResult,
}

/// Aborts the wrapped task when dropped, so aborting the outer task also
/// stops the handler
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// State of a single running execution
struct Execution<'a> {
    flow: &'a Flow,
    observer: Arc<dyn FlowObserver>,
    limit: usize,
    execution_id: ExecutionId,
    status: ExecutionStatus,
    state: StateContainer,
    bus: EventBus,
    evaluator: TriggerEvaluator<'a>,
    pending: VecDeque<usize>,
    running: Vec<bool>,
    in_flight: usize,
    invocations: Vec<u32>,
    tasks: JoinSet<Finished>,
    task_steps: HashMap<Id, usize>,
    runs: Vec<StepRun>,
    value: Option<Value>,
    final_step: Option<String>,
    started: Instant,
}

impl<'a> Execution<'a> {
    fn new(
        engine: &Engine,
        flow: &'a Flow,
        execution_id: ExecutionId,
        inputs: Map<String, Value>,
    ) -> Self {
        let steps = flow.steps().len();
        Self {
            flow,
            observer: Arc::clone(&engine.observer),
            limit: engine.options.max_concurrent_steps.unwrap_or(usize::MAX).max(1),
            execution_id,
            status: ExecutionStatus::Idle,
            state: StateContainer::new(FlowState::with_inputs(execution_id, inputs)),
            bus: EventBus::new(execution_id),
            evaluator: TriggerEvaluator::new(flow.steps()),
            pending: VecDeque::new(),
            running: vec![false; steps],
            in_flight: 0,
            invocations: vec![0; steps],
            tasks: JoinSet::new(),
            task_steps: HashMap::new(),
            runs: Vec::new(),
            value: None,
            final_step: None,
            started: Instant::now(),
        }
    }

    fn transition(&mut self, next: ExecutionStatus) {
        tracing::info!(from = %self.status, to = %next, "Execution status changed");
        self.status = next;
    }

    async fn run(mut self) -> Result<FlowOutcome, FlowError> {
        self.transition(ExecutionStatus::Running);
        self.observer.on_event(&EngineEvent::FlowStarted {
            flow: self.flow.name().to_string(),
            execution_id: self.execution_id,
        });

        self.pending.push_back(self.flow.start_index());

        loop {
            self.dispatch();

            let Some(joined) = self.tasks.join_next_with_id().await else {
                break;
            };

            let handled = match joined {
                Ok((id, finished)) => {
                    self.task_steps.remove(&id);
                    self.complete(finished)
                }
                Err(e) => Err(self.lost_task(e)),
            };

            if let Err(err) = handled {
                return Err(self.fail(err));
            }
        }

        self.transition(ExecutionStatus::Completed);
        let duration = self.started.elapsed();
        self.observer.on_event(&EngineEvent::FlowFinished {
            flow: self.flow.name().to_string(),
            success: true,
            value: self.value.clone(),
            duration,
        });
        tracing::info!(
            steps = self.runs.len(),
            events = self.bus.len(),
            duration_ms = duration.as_millis() as u64,
            "Flow completed"
        );

        Ok(FlowOutcome {
            execution_id: self.execution_id,
            flow: self.flow.name().to_string(),
            status: self.status,
            value: self.value,
            final_step: self.final_step,
            state: self.state.to_state(),
            events: self.bus.into_log(),
            runs: self.runs,
            duration,
        })
    }

    fn fail(&mut self, err: FlowError) -> FlowError {
        self.tasks.abort_all();
        self.transition(ExecutionStatus::Failed);
        tracing::error!(step = err.step().unwrap_or("-"), error = %err, "Flow failed");
        self.observer.on_event(&EngineEvent::FlowFinished {
            flow: self.flow.name().to_string(),
            success: false,
            value: None,
            duration: self.started.elapsed(),
        });
        err
    }

    /// Start every pending activation whose step is idle; hold the rest
    fn dispatch(&mut self) {
        let mut deferred = VecDeque::new();
        while let Some(idx) = self.pending.pop_front() {
            if self.running[idx] || self.in_flight >= self.limit {
                deferred.push_back(idx);
                continue;
            }
            self.spawn(idx);
        }
        self.pending = deferred;
    }

    fn spawn(&mut self, idx: usize) {
        let flow = self.flow;
        let step = &flow.steps()[idx];
        self.invocations[idx] += 1;
        let invocation = self.invocations[idx];
        self.running[idx] = true;
        self.in_flight += 1;
        self.evaluator.upstream_dispatched(step.name());

        tracing::debug!(step = step.name(), invocation, "Dispatching step");
        self.observer.on_event(&EngineEvent::StepStarted {
            step: step.name().to_string(),
            invocation,
        });

        let ctx = StepContext::new(step.shared_name(), invocation, self.state.clone());
        let handler = step.handler();
        let span = tracing::info_span!("step", step = step.name(), invocation);
        let started_at = Utc::now();
        let started = Instant::now();

        let handle = self.tasks.spawn(async move {
            let mut inner = AbortOnDrop(tokio::spawn(
                async move { handler.call(ctx).await }.instrument(span),
            ));
            let result = match (&mut inner.0).await {
                Ok(result) => TaskResult::Finished(result),
                Err(e) => TaskResult::Panicked(panic_message(e)),
            };
            Finished {
                idx,
                invocation,
                started_at,
                duration: started.elapsed(),
                result,
            }
        });
        self.task_steps.insert(handle.id(), idx);
    }

    /// Map a failed outer task back to the step it was running
    fn lost_task(&mut self, err: JoinError) -> FlowError {
        let step = self
            .task_steps
            .remove(&err.id())
            .map(|idx| self.flow.steps()[idx].name().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());

        if err.is_panic() {
            FlowError::StepPanicked {
                step,
                message: panic_message(err),
            }
        } else {
            FlowError::StepAborted {
                step,
                message: err.to_string(),
            }
        }
    }

    /// Apply a finished invocation: delta, completion event, label event
    fn complete(&mut self, finished: Finished) -> Result<(), FlowError> {
        let Finished {
            idx,
            invocation,
            started_at,
            duration,
            result,
        } = finished;
        let flow = self.flow;
        let step = &flow.steps()[idx];
        let name = step.name();

        self.running[idx] = false;
        self.in_flight -= 1;

        let notify_finished = |observer: &dyn FlowObserver, success: bool| {
            observer.on_event(&EngineEvent::StepFinished {
                step: name.to_string(),
                invocation,
                duration,
                success,
            });
        };

        let output = match result {
            TaskResult::Finished(Ok(output)) => output,
            TaskResult::Finished(Err(StepError::Validation(message))) => {
                notify_finished(self.observer.as_ref(), false);
                return Err(FlowError::Validation {
                    step: name.to_string(),
                    message,
                });
            }
            TaskResult::Finished(Err(source)) => {
                notify_finished(self.observer.as_ref(), false);
                return Err(FlowError::StepFailed {
                    step: name.to_string(),
                    source,
                });
            }
            TaskResult::Panicked(message) => {
                notify_finished(self.observer.as_ref(), false);
                return Err(FlowError::StepPanicked {
                    step: name.to_string(),
                    message,
                });
            }
        };

        let StepOutput {
            delta,
            route,
            value,
        } = output;

        // Routes are checked before any write lands
        let label = match (&route, step.routes()) {
            (Some(_), None) => {
                return Err(FlowError::UnexpectedRoute {
                    step: name.to_string(),
                });
            }
            (Some(Route::Label(label)), Some(declared)) => {
                if !declared.contains(label) {
                    return Err(FlowError::UndeclaredRoute {
                        step: name.to_string(),
                        label: label.to_string(),
                    });
                }
                Some(label.clone())
            }
            _ => None,
        };

        let written = self
            .state
            .write(|s| s.apply(name, step.declared_writes(), delta))
            .map_err(|source| FlowError::State {
                step: name.to_string(),
                source,
            })?;

        if value.is_some() {
            self.value = value;
            self.final_step = Some(name.to_string());
        }

        tracing::info!(
            step = name,
            invocation,
            fields = written,
            duration_ms = duration.as_millis() as u64,
            "Step completed"
        );
        notify_finished(self.observer.as_ref(), true);
        self.runs.push(StepRun {
            step: name.to_string(),
            invocation,
            started_at,
            duration,
            label: label.as_ref().map(ToString::to_string),
        });

        let completed = self.bus.append(EventKind::StepCompleted, name);
        self.activate(&completed);

        match label {
            Some(label) => {
                tracing::info!(step = name, label = %label, "Router emitted label");
                self.observer.on_event(&EngineEvent::LabelEmitted {
                    step: name.to_string(),
                    label: label.to_string(),
                });
                let emitted = self.bus.append(EventKind::LabelEmitted, label.as_str());
                self.activate(&emitted);
            }
            None if step.is_router() => {
                tracing::info!(step = name, "Router terminated its branch");
                self.observer.on_event(&EngineEvent::BranchTerminated {
                    step: name.to_string(),
                });
            }
            None => {}
        }

        Ok(())
    }

    fn activate(&mut self, event: &Event) {
        for idx in self.evaluator.activations(event) {
            tracing::debug!(
                step = self.flow.steps()[idx].name(),
                cause = %event.name,
                "Step activated"
            );
            self.pending.push_back(idx);
        }
    }
}
