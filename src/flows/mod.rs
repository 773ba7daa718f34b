//! Built-in business flows
//!
//! - `fund`: routes an investment goal to a growth or value analysis team
//!   and joins the chosen branch into a portfolio
//! - `blog`: researches a topic, drafts a post and revises it until an SEO
//!   review passes

pub mod blog;
pub mod fund;

use crate::agent::{Agent, ScriptedAgent};
use crate::artifacts::ArtifactStore;
use crate::config::StepflowConfig;
use crate::engine::{Flow, FlowDefinitionError, StepContext, StepError, StepOutput};
use crate::prompt::PromptError;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors while assembling a built-in flow
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown flow '{0}' (available: fund, blog)")]
    UnknownFlow(String),

    #[error(transparent)]
    Definition(#[from] FlowDefinitionError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// The flows this binary knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Fund,
    Blog,
}

impl FlowKind {
    pub const ALL: [FlowKind; 2] = [FlowKind::Fund, FlowKind::Blog];

    pub fn name(self) -> &'static str {
        match self {
            Self::Fund => "fund",
            Self::Blog => "blog",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Fund => "Route an investment goal to growth or value analysis and build a portfolio",
            Self::Blog => "Research a topic, draft a blog post and revise it until it passes SEO review",
        }
    }

    /// Input names and whether each is required
    pub fn inputs(self) -> &'static [(&'static str, bool)] {
        match self {
            Self::Fund => &[
                ("investment_goal", true),
                ("risk_preference", true),
                ("budget", true),
            ],
            Self::Blog => &[("topic", true), ("max_length", false)],
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlowKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CatalogError::UnknownFlow(s.to_string()))
    }
}

/// Collaborators a flow needs at runtime
#[derive(Clone)]
pub struct FlowDeps {
    pub agent: Arc<dyn Agent>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

/// Build the flow definition for `kind`
pub fn build(kind: FlowKind, deps: FlowDeps, config: &StepflowConfig) -> Result<Flow, CatalogError> {
    match kind {
        FlowKind::Fund => fund::build(deps.agent),
        FlowKind::Blog => blog::build(deps.agent, deps.artifacts, config.flows.blog.clone()),
    }
}

/// Inputs filled from configuration when the caller leaves them out
pub fn default_inputs(kind: FlowKind, config: &StepflowConfig) -> Map<String, Value> {
    let mut inputs = Map::new();
    if kind == FlowKind::Blog {
        inputs.insert(
            "max_length".into(),
            Value::from(config.flows.blog.max_length()),
        );
    }
    inputs
}

/// Canned agent replies that exercise the whole flow without network access
pub fn dry_run_agent(kind: FlowKind) -> ScriptedAgent {
    match kind {
        FlowKind::Fund => fund::scripted_agent(),
        FlowKind::Blog => blog::scripted_agent(),
    }
}

/// Adapt `async fn(Arc<D>, StepContext)` into a step handler closure
pub(crate) fn with_deps<D, F, Fut>(
    deps: &Arc<D>,
    f: F,
) -> impl Fn(StepContext) -> Fut + Send + Sync + 'static
where
    D: Send + Sync + 'static,
    F: Fn(Arc<D>, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
{
    let deps = Arc::clone(deps);
    move |ctx| f(Arc::clone(&deps), ctx)
}

/// Read a required, non-blank text input
pub(crate) fn required_text(ctx: &StepContext, field: &str, label: &str) -> Result<String, StepError> {
    match ctx.get_opt::<String>(field) {
        Ok(Some(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Ok(_) => Err(StepError::validation(format!("{} is required", label))),
        Err(_) => Err(StepError::validation(format!("{} must be text", label))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactStore;

    #[test]
    fn test_flow_kind_parsing() {
        assert_eq!("fund".parse::<FlowKind>().unwrap(), FlowKind::Fund);
        assert_eq!("BLOG".parse::<FlowKind>().unwrap(), FlowKind::Blog);
        assert!(matches!(
            "podcast".parse::<FlowKind>(),
            Err(CatalogError::UnknownFlow(_))
        ));
    }

    #[test]
    fn test_every_flow_builds() {
        let config = StepflowConfig::builtin();
        for kind in FlowKind::ALL {
            let deps = FlowDeps {
                agent: Arc::new(dry_run_agent(kind)),
                artifacts: Arc::new(FsArtifactStore::new("unused")),
            };
            let flow = build(kind, deps, &config).unwrap();
            assert_eq!(flow.name(), kind.name());
            assert!(flow.unreachable_steps().is_empty());
        }
    }

    #[test]
    fn test_blog_default_inputs() {
        let mut config = StepflowConfig::builtin();
        config.flows.blog.max_length = Some(1500);

        let inputs = default_inputs(FlowKind::Blog, &config);
        assert_eq!(inputs["max_length"], 1500);
        assert!(default_inputs(FlowKind::Fund, &config).is_empty());
    }
}
