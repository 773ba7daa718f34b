//! CLI command implementations

use super::output::{HandlerObserver, OutputHandler};
use crate::agent::{Agent, build_agent};
use crate::artifacts::FsArtifactStore;
use crate::config::StepflowConfig;
use crate::engine::{Engine, EngineOptions};
use crate::flows::{self, FlowDeps, FlowKind};
use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Exit code after an interrupt
const EXIT_INTERRUPTED: i32 = 130;

/// Run a built-in flow
pub async fn run_flow(
    kind: FlowKind,
    args: &[String],
    dry_run: bool,
    config: &StepflowConfig,
    handler: Arc<dyn OutputHandler>,
) -> Result<i32> {
    let mut inputs = flows::default_inputs(kind, config);
    inputs.extend(parse_flow_args(args)?);

    let agent: Arc<dyn Agent> = if dry_run {
        handler.info("Dry run: using scripted agent replies");
        Arc::new(flows::dry_run_agent(kind))
    } else {
        let (name, agent_config) = config.agent(agent_name(kind, config))?;
        build_agent(name, agent_config).with_context(|| format!("building agent '{}'", name))?
    };
    let deps = FlowDeps {
        agent,
        artifacts: Arc::new(FsArtifactStore::new(config.output_dir())),
    };

    let flow = flows::build(kind, deps, config)?;
    let engine = Engine::new(EngineOptions {
        max_concurrent_steps: config.engine.max_concurrent_steps,
    })
    .with_observer(Arc::new(HandlerObserver(Arc::clone(&handler))));

    // Dropping the kickoff future aborts every in-flight step
    let result = tokio::select! {
        result = engine.kickoff(&flow, Value::Object(inputs)) => result,
        _ = tokio::signal::ctrl_c() => {
            handler.info("\nInterrupted, cancelling running steps...");
            handler.result(false, None);
            return Ok(EXIT_INTERRUPTED);
        }
    };

    match result {
        Ok(outcome) => {
            tracing::debug!(
                execution_id = %outcome.execution_id,
                steps = outcome.runs.len(),
                "Flow outcome"
            );
            handler.result(true, outcome.value.as_ref());
            Ok(0)
        }
        Err(e) => {
            handler.info(&format!("Error: {}", e));
            handler.result(false, None);
            Ok(1)
        }
    }
}

fn agent_name(kind: FlowKind, config: &StepflowConfig) -> Option<&str> {
    match kind {
        FlowKind::Fund => config.flows.fund.agent.as_deref(),
        FlowKind::Blog => config.flows.blog.agent.as_deref(),
    }
}

/// Parse `key=value` flow arguments
///
/// Values that parse as JSON numbers, booleans, arrays or objects keep that
/// type; anything else is a string.
fn parse_flow_args(args: &[String]) -> Result<Map<String, Value>> {
    let mut parsed = Map::new();

    for arg in args {
        let Some((key, raw)) = arg.split_once('=') else {
            bail!("expected key=value, got '{}'", arg);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("missing input name in '{}'", arg);
        }

        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        parsed.insert(key.to_string(), value);
    }

    Ok(parsed)
}

/// Check that a flow definition builds, and describe it
pub fn validate_flow(kind: FlowKind, config: &StepflowConfig, handler: &dyn OutputHandler) -> i32 {
    let deps = FlowDeps {
        agent: Arc::new(flows::dry_run_agent(kind)),
        artifacts: Arc::new(FsArtifactStore::new(config.output_dir())),
    };

    match flows::build(kind, deps, config) {
        Ok(flow) => {
            handler.info(&format!(
                "✓ Flow '{}' is valid ({} steps, {} labels)",
                flow.name(),
                flow.steps().len(),
                flow.labels().len()
            ));
            for step in flow.steps() {
                let kind = if step.is_router() { "router" } else { "step" };
                handler.info(&format!("  {} {} on {}", kind, step.name(), step.trigger()));
            }
            let unreachable = flow.unreachable_steps();
            if !unreachable.is_empty() {
                handler.info(&format!("  warning: unreachable steps: {}", unreachable.join(", ")));
            }
            0
        }
        Err(e) => {
            handler.info(&format!("✗ Flow '{}' is invalid: {}", kind, e));
            1
        }
    }
}

/// Mermaid flowchart of a flow
pub fn show_graph(kind: FlowKind, config: &StepflowConfig) -> Result<String> {
    let deps = FlowDeps {
        agent: Arc::new(flows::dry_run_agent(kind)),
        artifacts: Arc::new(FsArtifactStore::new(config.output_dir())),
    };
    let flow = flows::build(kind, deps, config)?;
    Ok(flow.to_mermaid())
}

/// List built-in flows and their inputs
pub fn list_flows(handler: &dyn OutputHandler) {
    for kind in FlowKind::ALL {
        handler.info(kind.name());
        handler.info(&format!("  {}", kind.description()));
        let inputs: Vec<String> = kind
            .inputs()
            .iter()
            .map(|(name, required)| {
                if *required {
                    name.to_string()
                } else {
                    format!("[{}]", name)
                }
            })
            .collect();
        handler.info(&format!("  inputs: {}", inputs.join(" ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineEvent, FlowObserver};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockHandler {
        lines: Mutex<Vec<String>>,
        events: Mutex<Vec<EngineEvent>>,
        results: Mutex<Vec<(bool, Option<Value>)>>,
    }

    impl FlowObserver for MockHandler {
        fn on_event(&self, event: &EngineEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl OutputHandler for MockHandler {
        fn info(&self, message: &str) {
            self.lines.lock().unwrap().push(message.to_string());
        }

        fn result(&self, success: bool, output: Option<&Value>) {
            self.results.lock().unwrap().push((success, output.cloned()));
        }
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn config_in(dir: &TempDir) -> StepflowConfig {
        let mut config = StepflowConfig::builtin();
        config.output.dir = Some(dir.path().display().to_string());
        config
    }

    #[test]
    fn test_parse_flow_args_types() {
        let parsed = parse_flow_args(&args(&[
            "investment_goal=AI and robotics",
            "budget=20000",
            "tags=[\"a\",\"b\"]",
            "note=",
        ]))
        .unwrap();

        assert_eq!(parsed["investment_goal"], "AI and robotics");
        assert_eq!(parsed["budget"], 20000);
        assert_eq!(parsed["tags"][1], "b");
        assert_eq!(parsed["note"], "");
    }

    #[test]
    fn test_parse_flow_args_rejects_positional() {
        assert!(parse_flow_args(&args(&["robotics"])).is_err());
        assert!(parse_flow_args(&args(&["=x"])).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_blog_saves_artifact() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let handler = Arc::new(MockHandler::default());

        let code = run_flow(
            FlowKind::Blog,
            &args(&["topic=AI robotics"]),
            true,
            &config,
            handler.clone(),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        let results = handler.results.lock().unwrap();
        let (success, output) = &results[0];
        assert!(success);
        let path = output.as_ref().and_then(Value::as_str).unwrap();
        assert!(path.starts_with(&dir.path().display().to_string()));

        let events = handler.events.lock().unwrap();
        assert!(matches!(events.first(), Some(EngineEvent::FlowStarted { .. })));
        assert!(matches!(events.last(), Some(EngineEvent::FlowFinished { success: true, .. })));
    }

    #[tokio::test]
    async fn test_failed_flow_exits_nonzero() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let handler = Arc::new(MockHandler::default());

        let code = run_flow(FlowKind::Fund, &args(&["budget=100"]), true, &config, handler.clone())
            .await
            .unwrap();

        assert_eq!(code, 1);
        assert!(handler.lines.lock().unwrap().iter().any(|l| l.starts_with("Error:")));
        assert_eq!(handler.results.lock().unwrap()[0], (false, None));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.flows.fund.agent = Some("missing".into());

        let result = run_flow(
            FlowKind::Fund,
            &[],
            false,
            &config,
            Arc::new(MockHandler::default()),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_and_list() {
        let config = StepflowConfig::builtin();
        let handler = MockHandler::default();

        assert_eq!(validate_flow(FlowKind::Fund, &config, &handler), 0);
        list_flows(&handler);

        let lines = handler.lines.lock().unwrap();
        assert!(lines[0].contains("Flow 'fund' is valid (9 steps, 2 labels)"));
        assert!(lines.iter().any(|l| l == "  inputs: topic [max_length]"));
    }

    #[test]
    fn test_show_graph() {
        let graph = show_graph(FlowKind::Blog, &StepflowConfig::builtin()).unwrap();
        assert!(graph.starts_with("flowchart TD"));
        assert!(graph.contains("remake"));
    }
}
