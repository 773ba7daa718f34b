//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes. Every handler is
//! a [`FlowObserver`], so the engine drives progress output directly.

use crate::engine::{EngineEvent, FlowObserver};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

/// Presentation of engine progress and command results
pub trait OutputHandler: FlowObserver {
    /// Free-form status line
    fn info(&self, message: &str);

    /// Write final result
    fn result(&self, success: bool, output: Option<&Value>);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(d: Duration) -> String {
        let ms = d.as_millis();
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", d.as_secs_f64())
        }
    }

    fn render(&self, event: &EngineEvent) -> Option<String> {
        match event {
            EngineEvent::FlowStarted { flow, execution_id } => Some(if self.debug {
                format!("Running flow '{}' ({})", flow, execution_id)
            } else {
                format!("Running flow '{}'", flow)
            }),
            EngineEvent::StepStarted { step, invocation } => Some(if *invocation > 1 {
                format!("  → {} (pass {})", step, invocation)
            } else {
                format!("  → {}", step)
            }),
            EngineEvent::StepFinished {
                step,
                duration,
                success,
                ..
            } => {
                let mark = if *success { "✓" } else { "✗" };
                Some(format!("  {} {} ({})", mark, step, Self::format_duration(*duration)))
            }
            EngineEvent::LabelEmitted { step, label } => {
                Some(format!("  ↳ {} routed to '{}'", step, label))
            }
            EngineEvent::BranchTerminated { step } => {
                Some(format!("  ■ {} ended its branch", step))
            }
            EngineEvent::FlowFinished {
                flow,
                success,
                duration,
                ..
            } => Some(if *success {
                format!(
                    "\n✓ Flow '{}' completed in {}",
                    flow,
                    Self::format_duration(*duration)
                )
            } else {
                format!(
                    "\n✗ Flow '{}' failed after {}",
                    flow,
                    Self::format_duration(*duration)
                )
            }),
        }
    }
}

impl FlowObserver for ConsoleHandler {
    fn on_event(&self, event: &EngineEvent) {
        if let Some(line) = self.render(event) {
            eprintln!("{}", line);
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn info(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn result(&self, _success: bool, output: Option<&Value>) {
        match output {
            Some(Value::String(s)) => println!("{}", s),
            Some(other) => println!(
                "{}",
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
            ),
            None => {}
        }
    }
}

/// JSON lines output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl FlowObserver for JsonHandler {
    fn on_event(&self, event: &EngineEvent) {
        self.print_json(event);
    }
}

impl OutputHandler for JsonHandler {
    fn info(&self, message: &str) {
        #[derive(Serialize)]
        struct Info<'a> {
            r#type: &'static str,
            message: &'a str,
        }

        self.print_json(&Info {
            r#type: "info",
            message,
        });
    }

    fn result(&self, success: bool, output: Option<&Value>) {
        #[derive(Serialize)]
        struct FinalResult<'a> {
            r#type: &'static str,
            success: bool,
            output: Option<&'a Value>,
        }

        self.print_json(&FinalResult {
            r#type: "result",
            success,
            output,
        });
    }
}

/// Quiet handler: only the final output
pub struct QuietHandler;

impl FlowObserver for QuietHandler {
    fn on_event(&self, _event: &EngineEvent) {}
}

impl OutputHandler for QuietHandler {
    fn info(&self, _message: &str) {}

    fn result(&self, _success: bool, output: Option<&Value>) {
        match output {
            Some(Value::String(s)) => println!("{}", s),
            Some(other) => println!("{}", other),
            None => {}
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Arc<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Arc::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Arc::new(JsonHandler::new(false)),
        OutputMode::Quiet => Arc::new(QuietHandler),
    }
}

/// Hands engine events to an [`OutputHandler`]
pub struct HandlerObserver(pub Arc<dyn OutputHandler>);

impl FlowObserver for HandlerObserver {
    fn on_event(&self, event: &EngineEvent) {
        self.0.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionId;
    use clap::ValueEnum;

    #[test]
    fn test_output_mode_from_str() {
        assert_eq!(OutputMode::from_str("json", true).unwrap(), OutputMode::Json);
        assert_eq!(OutputMode::from_str("quiet", true).unwrap(), OutputMode::Quiet);
        assert_eq!(OutputMode::from_str("CONSOLE", true).unwrap(), OutputMode::Console);
        assert!(OutputMode::from_str("unknown", true).is_err());
    }

    #[test]
    fn test_console_format_duration() {
        assert_eq!(ConsoleHandler::format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(ConsoleHandler::format_duration(Duration::from_millis(1000)), "1.0s");
        assert_eq!(ConsoleHandler::format_duration(Duration::from_millis(2500)), "2.5s");
    }

    #[test]
    fn test_console_renders_cycles_and_routes() {
        let handler = ConsoleHandler::new(false);

        let line = handler
            .render(&EngineEvent::StepStarted {
                step: "handle_make_blog".into(),
                invocation: 2,
            })
            .unwrap();
        assert_eq!(line, "  → handle_make_blog (pass 2)");

        let line = handler
            .render(&EngineEvent::LabelEmitted {
                step: "manage_score_router".into(),
                label: "remake".into(),
            })
            .unwrap();
        assert!(line.contains("'remake'"));

        let line = handler
            .render(&EngineEvent::FlowStarted {
                flow: "blog".into(),
                execution_id: ExecutionId::new(),
            })
            .unwrap();
        assert_eq!(line, "Running flow 'blog'");
    }

    #[test]
    fn test_engine_events_serialize_with_type_tag() {
        let event = EngineEvent::StepFinished {
            step: "manage_seo".into(),
            invocation: 1,
            duration: Duration::from_millis(1500),
            success: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_finished");
        assert_eq!(json["duration"], 1500);
    }

    #[test]
    fn test_create_handler() {
        let _ = create_handler(OutputMode::Console, false);
        let _ = create_handler(OutputMode::Json, false);
        let _ = create_handler(OutputMode::Quiet, false);
    }
}
