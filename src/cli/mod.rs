//! CLI module for stepflow
//!
//! This module provides:
//! - Command implementations (run, validate, graph, flows)
//! - Output handlers (console, JSON, quiet) that observe engine progress
//!
//! # Example
//!
//! ```ignore
//! use stepflow::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::run_flow(FlowKind::Blog, &args, false, &config, handler).await?;
//! ```

pub mod commands;
pub mod output;

pub use commands::{list_flows, run_flow, show_graph, validate_flow};
pub use output::{HandlerObserver, OutputHandler, OutputMode, create_handler};
