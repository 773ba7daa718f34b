//! Configuration types and loading for stepflow

mod agent;
mod flows;
mod loader;

pub use agent::AgentConfig;
pub use flows::{
    BlogSettings, DEFAULT_MAX_LENGTH, DEFAULT_PASS_SCORE, EngineSettings, FlowsConfig,
    FundSettings, OutputSettings,
};
pub use loader::{DEFAULT_AGENT, StepflowConfig};
