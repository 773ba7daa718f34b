//! Triggers and the evaluator that turns events into step activations

use super::event::{Event, EventKind};
use super::step::Step;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A routing label emitted by a router step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Condition under which a step becomes eligible
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Once, when the execution begins
    OnStart,
    /// Each time the named step completes
    OnComplete(String),
    /// Each time any router emits the label
    OnLabel(Label),
    /// First satisfied sub-trigger wins
    OnAny(Vec<Trigger>),
}

impl Trigger {
    pub fn on_start() -> Self {
        Self::OnStart
    }

    pub fn on_complete(step: impl Into<String>) -> Self {
        Self::OnComplete(step.into())
    }

    pub fn on_label(label: impl Into<Label>) -> Self {
        Self::OnLabel(label.into())
    }

    pub fn any(triggers: impl IntoIterator<Item = Trigger>) -> Self {
        Self::OnAny(triggers.into_iter().collect())
    }

    /// Combine two triggers into a join, flattening nested joins
    pub fn or(self, other: Trigger) -> Self {
        let mut items = match self {
            Self::OnAny(items) => items,
            single => vec![single],
        };
        match other {
            Self::OnAny(more) => items.extend(more),
            single => items.push(single),
        }
        Self::OnAny(items)
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Self::OnStart)
    }

    pub fn is_join(&self) -> bool {
        matches!(self, Self::OnAny(_))
    }

    /// Whether this single event satisfies the trigger
    ///
    /// `OnStart` is never satisfied by a logged event; the engine activates
    /// the start step directly at kickoff.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::OnStart => false,
            Self::OnComplete(step) => event.is_completion_of(step),
            Self::OnLabel(label) => event.is_label(label.as_str()),
            Self::OnAny(items) => items.iter().any(|t| t.matches(event)),
        }
    }

    /// Step names this trigger listens to
    pub fn referenced_steps(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |t| {
            if let Self::OnComplete(step) = t {
                out.push(step.as_str());
            }
        });
        out
    }

    /// Labels this trigger listens to
    pub fn referenced_labels(&self) -> Vec<&Label> {
        let mut out = Vec::new();
        self.walk(&mut |t| {
            if let Self::OnLabel(label) = t {
                out.push(label);
            }
        });
        out
    }

    /// True if `OnStart` appears anywhere below the top level
    pub(crate) fn has_nested_start(&self) -> bool {
        match self {
            Self::OnAny(items) => items
                .iter()
                .any(|t| t.is_start() || t.has_nested_start()),
            _ => false,
        }
    }

    /// True if any join in the tree has no sub-triggers
    pub(crate) fn has_empty_join(&self) -> bool {
        match self {
            Self::OnAny(items) => items.is_empty() || items.iter().any(Self::has_empty_join),
            _ => false,
        }
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Trigger)) {
        f(self);
        if let Self::OnAny(items) = self {
            for item in items {
                item.walk(f);
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnStart => write!(f, "start"),
            Self::OnComplete(step) => write!(f, "complete({})", step),
            Self::OnLabel(label) => write!(f, "label({})", label),
            Self::OnAny(items) => {
                write!(f, "any(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Decides which steps an event activates
///
/// Plain triggers activate once per satisfying event occurrence. Joins are
/// first-wins: after a completion has activated a join, completions of its
/// other upstream steps are ignored until one of those upstreams is
/// dispatched again ([`TriggerEvaluator::upstream_dispatched`]). A label the
/// join listens to always activates it.
#[derive(Debug)]
pub struct TriggerEvaluator<'f> {
    steps: &'f [Step],
    joined: Vec<bool>,
}

impl<'f> TriggerEvaluator<'f> {
    pub fn new(steps: &'f [Step]) -> Self {
        Self {
            steps,
            joined: vec![false; steps.len()],
        }
    }

    /// Indices of the steps activated by `event`, in registration order
    pub fn activations(&mut self, event: &Event) -> Vec<usize> {
        let mut activated = Vec::new();
        for (idx, step) in self.steps.iter().enumerate() {
            let trigger = step.trigger();
            if !trigger.matches(event) {
                continue;
            }

            if trigger.is_join() {
                if event.kind == EventKind::StepCompleted && self.joined[idx] {
                    tracing::debug!(
                        step = step.name(),
                        upstream = %event.name,
                        "Join already satisfied, ignoring"
                    );
                    continue;
                }
                self.joined[idx] = true;
            }

            activated.push(idx);
        }
        activated
    }

    /// Re-arm every join fed by the completion of `step`
    ///
    /// Called when `step` starts a new invocation, so its next completion
    /// belongs to a fresh pass and may fire the join again.
    pub fn upstream_dispatched(&mut self, step: &str) {
        for (idx, candidate) in self.steps.iter().enumerate() {
            let trigger = candidate.trigger();
            if self.joined[idx] && trigger.is_join() && trigger.referenced_steps().contains(&step) {
                tracing::debug!(step = candidate.name(), upstream = step, "Join re-armed");
                self.joined[idx] = false;
            }
        }
    }
}
