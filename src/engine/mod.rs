//! Event-driven flow execution engine
//!
//! This module handles:
//! - Per-execution state with declared, engine-applied writes
//! - Step registration with start, completion, label and join triggers
//! - Router steps that pick a branch at runtime
//! - Concurrent dispatch, first-wins joins and label-driven cycles
//!
//! # Example
//!
//! ```ignore
//! use stepflow::engine::{Flow, Step, StepContext, StepOutput, Trigger};
//!
//! let flow = Flow::builder("review")
//!     .step(Step::new("draft", Trigger::on_start(), draft))
//!     .step(
//!         Step::router("score", Trigger::on_complete("draft"), ["redraft"], score)
//!             .writes(["score"]),
//!     )
//!     .step(Step::new("redraft", Trigger::on_label("redraft"), draft))
//!     .build()?;
//!
//! let outcome = flow.kickoff(serde_json::json!({"topic": "rust"})).await?;
//! println!("{:?}", outcome.value);
//! ```

mod event;
mod executor;
mod flow;
mod observer;
mod state;
mod step;
mod trigger;

pub use event::{Event, EventBus, EventKind};
pub use executor::{Engine, EngineOptions, ExecutionStatus, FlowError, FlowOutcome, StepRun};
pub use flow::{Edge, EdgeKind, Flow, FlowBuilder, FlowDefinitionError, or_};
pub use observer::{EngineEvent, FlowObserver, NoopObserver, RecordingObserver};
pub use state::{ExecutionId, FlowState, StateContainer, StateDelta, StateError};
pub use step::{Route, Step, StepContext, StepError, StepHandler, StepOutput};
pub use trigger::{Label, Trigger, TriggerEvaluator};
