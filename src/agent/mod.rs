//! Agent invocation
//!
//! Steps talk to language models through the [`Agent`] trait. Concrete
//! agents are an OpenAI-compatible HTTP client, a retry wrapper, and a
//! scripted agent used for dry runs and tests.
//!
//! # Example
//!
//! ```ignore
//! use stepflow::agent::{build_agent, AgentTask};
//!
//! let agent = build_agent("openai", &config.agents["openai"])?;
//! let reply = agent
//!     .complete(&AgentTask::new("senior researcher", "Summarize AI robotics trends"))
//!     .await?;
//! println!("{}", reply.text);
//! ```

mod http;
mod output_parser;
mod retry;
mod scripted;
mod types;

pub use http::HttpAgent;
pub use output_parser::extract_json;
pub use retry::RetryAgent;
pub use scripted::ScriptedAgent;
pub use types::{Agent, AgentError, AgentReply, AgentTask, RetryPolicy, TokenUsage};

use crate::config::AgentConfig;
use std::sync::Arc;

/// Build an HTTP agent wrapped in retry logic from its config
pub fn build_agent(name: &str, config: &AgentConfig) -> Result<Arc<dyn Agent>, AgentError> {
    let agent = HttpAgent::from_config(name, config)?;
    Ok(Arc::new(RetryAgent::new(agent, RetryPolicy::from_config(config))))
}
