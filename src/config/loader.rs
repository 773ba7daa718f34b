//! Configuration loading with multi-layer merge

use super::{AgentConfig, EngineSettings, FlowsConfig, OutputSettings};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Agent used when a flow names none
pub const DEFAULT_AGENT: &str = "openai";

/// Top-level stepflow configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepflowConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub output: OutputSettings,

    /// Agent endpoint definitions
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,

    #[serde(default)]
    pub flows: FlowsConfig,
}

impl StepflowConfig {
    /// Built-in defaults: a single hosted OpenAI agent
    pub fn builtin() -> Self {
        let mut config = Self::default();
        config
            .agents
            .insert(DEFAULT_AGENT.to_string(), AgentConfig::openai());
        config
    }

    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/stepflow/config.toml
    /// 3. .stepflow/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::builtin();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(".stepflow/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".stepflow/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        tracing::debug!(agents = config.agents.len(), "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// ~/.config/stepflow/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stepflow/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.engine.max_concurrent_steps.is_some() {
            self.engine.max_concurrent_steps = other.engine.max_concurrent_steps;
        }
        if other.output.dir.is_some() {
            self.output.dir = other.output.dir;
        }
        for (name, agent) in other.agents {
            self.agents.insert(name, agent);
        }
        self.flows.merge(other.flows);
    }

    /// Look up an agent, falling back to [`DEFAULT_AGENT`]
    pub fn agent(&self, name: Option<&str>) -> Result<(&str, &AgentConfig)> {
        let name = name.unwrap_or(DEFAULT_AGENT);
        match self.agents.get_key_value(name) {
            Some((key, agent)) => Ok((key.as_str(), agent)),
            None => {
                let known: Vec<&str> = self.agents.keys().map(String::as_str).collect();
                bail!("agent '{}' is not configured (known: {})", name, known.join(", "))
            }
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output.resolved_dir()
    }
}
