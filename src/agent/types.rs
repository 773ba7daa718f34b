//! Core types and traits for agent invocation

use super::output_parser::extract_json;
use crate::config::AgentConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error types that can occur while asking an agent
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Request timed out
    #[error("timeout after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Rate limited by the provider
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit { retry_after: Option<Duration> },

    /// Authentication failed
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Network error
    #[error("network error: {message}")]
    Network { message: String },

    /// Reply could not be parsed
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A scripted agent ran out of replies for a role
    #[error("no scripted reply left for role '{role}'")]
    Exhausted { role: String },
}

impl AgentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Timeout { .. } | AgentError::RateLimit { .. } | AgentError::Network { .. }
        )
    }

    /// Server-suggested delay for rate limit errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AgentError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    pub fn rate_limit(retry_after: Option<Duration>) -> Self {
        Self::RateLimit { retry_after }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// One piece of work handed to an agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTask {
    /// Persona the agent plays, e.g. "SEO specialist"
    pub role: String,

    /// What the persona is trying to achieve
    pub goal: Option<String>,

    /// Rendered prompt
    pub prompt: String,

    /// Override timeout for this task
    pub timeout: Option<Duration>,
}

impl AgentTask {
    pub fn new(role: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            goal: None,
            prompt: prompt.into(),
            timeout: None,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// System message describing the persona
    pub fn system_prompt(&self) -> String {
        match &self.goal {
            Some(goal) => format!("You are a {}. Your goal: {}", self.role, goal),
            None => format!("You are a {}.", self.role),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// What an agent answered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    /// Raw text output
    pub text: String,

    /// Agent name that produced this reply
    pub agent: String,

    /// Model used (if known)
    pub model: Option<String>,

    /// Time taken
    pub duration: Duration,

    /// Token usage (if available)
    pub usage: Option<TokenUsage>,
}

impl AgentReply {
    pub fn new(text: impl Into<String>, agent: impl Into<String>, duration: Duration) -> Self {
        Self {
            text: text.into(),
            agent: agent.into(),
            model: None,
            duration,
            usage: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Parse a JSON payload out of the reply text
    ///
    /// Accepts bare JSON, fenced code blocks, and JSON embedded in prose.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let value = extract_json(&self.text)
            .ok_or_else(|| AgentError::parse(format!("no JSON found in reply from {}", self.agent)))?;
        serde_json::from_value(value)
            .map_err(|e| AgentError::parse(format!("unexpected JSON shape: {}", e)))
    }
}

/// Something that can complete an [`AgentTask`]
#[async_trait]
pub trait Agent: Send + Sync {
    async fn complete(&self, task: &AgentTask) -> Result<AgentReply, AgentError>;

    fn name(&self) -> &str;
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries
    pub max_retries: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.retry_delay_ms),
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            // up to 25% extra
            capped + rand::random::<f64>() * 0.25 * capped
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        score: u32,
        reason: String,
    }

    #[test]
    fn test_agent_error_retryable() {
        assert!(AgentError::timeout(Duration::from_secs(30)).is_retryable());
        assert!(AgentError::rate_limit(None).is_retryable());
        assert!(AgentError::network("connection reset").is_retryable());

        assert!(!AgentError::auth("invalid token").is_retryable());
        assert!(!AgentError::parse("no json").is_retryable());
        assert!(!AgentError::Exhausted { role: "seo".into() }.is_retryable());
    }

    #[test]
    fn test_system_prompt() {
        let task = AgentTask::new("SEO specialist", "Rate this post").with_goal("score posts strictly");
        assert_eq!(
            task.system_prompt(),
            "You are a SEO specialist. Your goal: score posts strictly"
        );
        assert_eq!(AgentTask::new("researcher", "x").system_prompt(), "You are a researcher.");
    }

    #[test]
    fn test_reply_json_from_fenced_block() {
        let reply = AgentReply::new(
            "Here you go:\n```json\n{\"score\": 72, \"reason\": \"thin keywords\"}\n```",
            "scripted",
            Duration::ZERO,
        );
        let verdict: Verdict = reply.json().unwrap();
        assert_eq!(verdict.score, 72);
    }

    #[test]
    fn test_reply_json_errors() {
        let reply = AgentReply::new("no structure here", "scripted", Duration::ZERO);
        assert!(matches!(reply.json::<Verdict>(), Err(AgentError::Parse { .. })));

        let reply = AgentReply::new(r#"{"score": "high"}"#, "scripted", Duration::ZERO);
        assert!(matches!(reply.json::<Verdict>(), Err(AgentError::Parse { .. })));
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_policy_jitter_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            jitter: true,
            ..Default::default()
        };

        let delay = policy.delay_for_attempt(0);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1250));
    }
}
