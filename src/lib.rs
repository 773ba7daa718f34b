//! stepflow: event-driven step orchestration
//!
//! Flows are sets of named steps wired together by triggers (start,
//! completion, router labels and first-wins joins). The [`engine`] runs them
//! concurrently over a shared, typed state; [`flows`] holds the built-in
//! agent pipelines.

pub mod agent;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod engine;
pub mod flows;
pub mod logging;
pub mod prompt;
