//! OpenAI-compatible chat completions agent

use super::types::{Agent, AgentError, AgentReply, AgentTask, TokenUsage};
use crate::config::AgentConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Agent backed by an HTTP chat completions endpoint
#[derive(Debug, Clone)]
pub struct HttpAgent {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

impl HttpAgent {
    /// Build from config, reading the API key from `api_key_env` if set
    pub fn from_config(name: impl Into<String>, config: &AgentConfig) -> Result<Self, AgentError> {
        let name = name.into();
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                AgentError::config(format!("agent '{}': environment variable {} is not set", name, var))
            })?),
            None => None,
        };

        let mut agent = Self::new(name, config.url.clone())?
            .with_timeout(Duration::from_secs(config.timeout));
        agent.api_key = api_key;
        agent.model = config.model.clone();
        Ok(agent)
    }

    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            model: None,
            timeout: Duration::from_secs(300),
            client,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn chat_completion_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn map_http_error(&self, status: reqwest::StatusCode, body: &str) -> AgentError {
        match status.as_u16() {
            401 | 403 => AgentError::auth(format!("HTTP {}: {}", status, body)),
            429 => AgentError::rate_limit(parse_retry_after(body)),
            408 | 504 => AgentError::timeout(self.timeout),
            400..=499 => AgentError::config(format!("HTTP {}: {}", status, body)),
            _ => AgentError::network(format!("HTTP {}: {}", status, body)),
        }
    }

    fn request_body(&self, task: &AgentTask) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            messages: vec![
                Message {
                    role: "system",
                    content: task.system_prompt(),
                },
                Message {
                    role: "user",
                    content: task.prompt.clone(),
                },
            ],
        }
    }
}

fn parse_retry_after(body: &str) -> Option<Duration> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("retry_after")?
        .as_f64()
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl Agent for HttpAgent {
    async fn complete(&self, task: &AgentTask) -> Result<AgentReply, AgentError> {
        let start = Instant::now();
        let mut request = self
            .client
            .post(self.chat_completion_url())
            .json(&self.request_body(task));

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(agent = %self.name, role = %task.role, prompt_len = task.prompt.len(), "Sending agent request");

        let timeout = task.timeout.unwrap_or(self.timeout);
        let response = match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(AgentError::timeout(start.elapsed())),
            Ok(Err(e)) if e.is_connect() => {
                return Err(AgentError::network(format!("connection failed: {}", e)));
            }
            Ok(Err(e)) => return Err(AgentError::network(format!("request failed: {}", e))),
            Err(_) => return Err(AgentError::timeout(start.elapsed())),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.map_http_error(status, &body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::parse(format!("failed to parse response: {}", e)))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let mut reply = AgentReply::new(text, self.name.clone(), start.elapsed());
        if let Some(model) = completion.model {
            reply = reply.with_model(model);
        }
        if let Some(usage) = completion.usage {
            reply = reply.with_usage(TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        tracing::debug!(agent = %self.name, duration_ms = reply.duration.as_millis() as u64, "Agent replied");
        Ok(reply)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
