//! Flow definitions: builder, validation and graph inspection

use super::executor::{Engine, FlowError, FlowOutcome};
use super::step::Step;
use super::trigger::{Label, Trigger};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use thiserror::Error;

/// Errors detected while building a flow definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowDefinitionError {
    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownStepReference { step: String, reference: String },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' listens for label '{label}' that no router declares")]
    UnknownLabel { step: String, label: String },

    #[error("field '{field}' is written by both '{first}' and '{second}'")]
    ConflictingWrites {
        field: String,
        first: String,
        second: String,
    },
}

/// How one step reaches another
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum EdgeKind {
    Completion,
    Label(Label),
}

/// A trigger edge between two steps; back-edges of cycles included
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub via: EdgeKind,
}

/// Collects step declarations for a flow
#[derive(Debug)]
pub struct FlowBuilder {
    name: String,
    description: String,
    steps: Vec<Step>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Register a step; order of registration is dispatch order for fan-out
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate the declarations and freeze them into a [`Flow`]
    pub fn build(self) -> Result<Flow, FlowDefinitionError> {
        let mut index = HashMap::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if index.insert(step.name().to_string(), idx).is_some() {
                return Err(FlowDefinitionError::DuplicateStep(step.name().to_string()));
            }
        }

        let starts: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.trigger().is_start())
            .map(|(i, _)| i)
            .collect();
        let start = match starts.as_slice() {
            [only] => *only,
            [] => {
                return Err(FlowDefinitionError::InvalidTopology(format!(
                    "flow '{}' has no start step",
                    self.name
                )));
            }
            many => {
                let names: Vec<&str> = many.iter().map(|&i| self.steps[i].name()).collect();
                return Err(FlowDefinitionError::InvalidTopology(format!(
                    "flow '{}' has {} start steps: {}",
                    self.name,
                    many.len(),
                    names.join(", ")
                )));
            }
        };

        let mut labels = BTreeSet::new();
        for step in &self.steps {
            if let Some(routes) = step.routes() {
                if routes.is_empty() {
                    return Err(FlowDefinitionError::InvalidTopology(format!(
                        "router '{}' declares no labels",
                        step.name()
                    )));
                }
                labels.extend(routes.iter().cloned());
            }
        }

        let mut producers: BTreeMap<&str, &str> = BTreeMap::new();
        for step in &self.steps {
            let trigger = step.trigger();

            if trigger.has_nested_start() {
                return Err(FlowDefinitionError::InvalidTopology(format!(
                    "step '{}' nests a start trigger inside a join",
                    step.name()
                )));
            }
            if trigger.has_empty_join() {
                return Err(FlowDefinitionError::InvalidTopology(format!(
                    "step '{}' has a join with no sub-triggers",
                    step.name()
                )));
            }

            for reference in trigger.referenced_steps() {
                if !index.contains_key(reference) {
                    return Err(FlowDefinitionError::UnknownStepReference {
                        step: step.name().to_string(),
                        reference: reference.to_string(),
                    });
                }
            }

            for label in trigger.referenced_labels() {
                if !labels.contains(label) {
                    return Err(FlowDefinitionError::UnknownLabel {
                        step: step.name().to_string(),
                        label: label.to_string(),
                    });
                }
            }

            for field in step.declared_writes() {
                if let Some(first) = producers.insert(field.as_str(), step.name()) {
                    return Err(FlowDefinitionError::ConflictingWrites {
                        field: field.clone(),
                        first: first.to_string(),
                        second: step.name().to_string(),
                    });
                }
            }
        }

        let flow = Flow {
            name: self.name,
            description: self.description,
            steps: self.steps,
            index,
            start,
            labels,
        };

        for name in flow.unreachable_steps() {
            tracing::warn!(flow = %flow.name, step = name, "Step is unreachable from the start step");
        }

        Ok(flow)
    }
}

/// A validated, immutable flow topology
#[derive(Debug)]
pub struct Flow {
    name: String,
    description: String,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    start: usize,
    labels: BTreeSet<Label>,
}

impl Flow {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Steps in registration order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn start_step(&self) -> &Step {
        &self.steps[self.start]
    }

    pub(crate) fn start_index(&self) -> usize {
        self.start
    }

    /// Every label some router may emit
    pub fn labels(&self) -> &BTreeSet<Label> {
        &self.labels
    }

    /// Explicit graph of trigger edges
    ///
    /// A completion trigger yields one edge from the upstream step. A label
    /// trigger yields one edge from every router declaring that label.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for step in &self.steps {
            for upstream in step.trigger().referenced_steps() {
                edges.push(Edge {
                    from: upstream.to_string(),
                    to: step.name().to_string(),
                    via: EdgeKind::Completion,
                });
            }
            for label in step.trigger().referenced_labels() {
                for router in self.routers_for(label) {
                    edges.push(Edge {
                        from: router.to_string(),
                        to: step.name().to_string(),
                        via: EdgeKind::Label(label.clone()),
                    });
                }
            }
        }
        edges
    }

    fn routers_for<'a>(&'a self, label: &'a Label) -> impl Iterator<Item = &'a str> + 'a {
        self.steps
            .iter()
            .filter(move |s| s.routes().is_some_and(|r| r.contains(label)))
            .map(Step::name)
    }

    /// Steps no chain of edges leads to from the start step
    pub fn unreachable_steps(&self) -> Vec<&str> {
        let edges = self.edges();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([self.start_step().name()]);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for edge in edges.iter().filter(|e| e.from == current) {
                if let Some(next) = self.step(&edge.to) {
                    queue.push_back(next.name());
                }
            }
        }

        self.steps
            .iter()
            .map(Step::name)
            .filter(|name| !seen.contains(name))
            .collect()
    }

    /// Render the topology as a Mermaid flowchart
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("flowchart TD\n");
        for (idx, step) in self.steps.iter().enumerate() {
            let node = if idx == self.start {
                format!("([{}])", step.name())
            } else if step.is_router() {
                format!("{{{}}}", step.name())
            } else {
                format!("[{}]", step.name())
            };
            let _ = writeln!(out, "    {}{}", step.name(), node);
        }
        for edge in self.edges() {
            match edge.via {
                EdgeKind::Completion => {
                    let _ = writeln!(out, "    {} --> {}", edge.from, edge.to);
                }
                EdgeKind::Label(label) => {
                    let _ = writeln!(out, "    {} -- {} --> {}", edge.from, label, edge.to);
                }
            }
        }
        out
    }

    /// Run this flow once with a default engine
    pub async fn kickoff<I: Serialize>(&self, inputs: I) -> Result<FlowOutcome, FlowError> {
        Engine::default().kickoff(self, inputs).await
    }
}

/// Convenience for building triggers in flow definitions
pub fn or_(a: Trigger, b: Trigger) -> Trigger {
    a.or(b)
}
