//! Agent endpoint configuration

use serde::{Deserialize, Serialize};

/// Configuration for one OpenAI-compatible agent endpoint
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Base URL of the chat completions API
    pub url: String,

    /// Model name
    pub model: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Timeout in seconds for requests
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Maximum retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: None,
            api_key_env: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl AgentConfig {
    /// The hosted OpenAI endpoint, keyed from `OPENAI_API_KEY`
    pub fn openai() -> Self {
        Self {
            url: "https://api.openai.com/v1".into(),
            model: Some("gpt-4o-mini".into()),
            api_key_env: Some("OPENAI_API_KEY".into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let config: AgentConfig = toml::from_str(r#"url = "http://localhost:11434/v1""#).unwrap();
        assert_eq!(config.url, "http://localhost:11434/v1");
        assert_eq!(config.timeout, 300);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            url = "https://api.openai.com/v1"
            model = "o4-mini"
            api_key_env = "OPENAI_API_KEY"
            timeout = 60
            max_retries = 5
            retry_delay_ms = 250
        "#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.model.as_deref(), Some("o4-mini"));
        assert_eq!(config.timeout, 60);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_reject_unknown_fields() {
        let result: Result<AgentConfig, _> = toml::from_str(
            r#"
            url = "https://api.openai.com/v1"
            temperature = 0.2
        "#,
        );
        assert!(result.is_err());
    }
}
