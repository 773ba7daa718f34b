//! Engine, output and per-flow settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PASS_SCORE: u32 = 80;
pub const DEFAULT_MAX_LENGTH: u32 = 1000;
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// `[engine]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Cap on concurrently running steps
    pub max_concurrent_steps: Option<usize>,
}

/// `[output]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    /// Artifact directory; `~` and `$VARS` are expanded
    pub dir: Option<String>,
}

impl OutputSettings {
    pub fn resolved_dir(&self) -> PathBuf {
        let raw = self.dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR);
        match shellexpand::full(raw) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(e) => {
                tracing::warn!(dir = raw, error = %e, "Could not expand output dir, using it verbatim");
                PathBuf::from(raw)
            }
        }
    }
}

/// `[flows.fund]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FundSettings {
    /// Name of the `[agents.*]` entry to use
    pub agent: Option<String>,
}

/// `[flows.blog]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BlogSettings {
    pub agent: Option<String>,

    /// Minimum SEO score that ends the revision loop
    pub pass_score: Option<u32>,

    /// Default `max_length` input
    pub max_length: Option<u32>,

    /// Stop revising after this many drafts even if the score is low
    pub max_revisions: Option<u32>,
}

impl BlogSettings {
    pub fn pass_score(&self) -> u32 {
        self.pass_score.unwrap_or(DEFAULT_PASS_SCORE)
    }

    pub fn max_length(&self) -> u32 {
        self.max_length.unwrap_or(DEFAULT_MAX_LENGTH)
    }

    fn merge(&mut self, other: Self) {
        if other.agent.is_some() {
            self.agent = other.agent;
        }
        if other.pass_score.is_some() {
            self.pass_score = other.pass_score;
        }
        if other.max_length.is_some() {
            self.max_length = other.max_length;
        }
        if other.max_revisions.is_some() {
            self.max_revisions = other.max_revisions;
        }
    }
}

/// `[flows]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowsConfig {
    #[serde(default)]
    pub fund: FundSettings,

    #[serde(default)]
    pub blog: BlogSettings,
}

impl FlowsConfig {
    pub(crate) fn merge(&mut self, other: Self) {
        if other.fund.agent.is_some() {
            self.fund.agent = other.fund.agent;
        }
        self.blog.merge(other.blog);
    }
}
