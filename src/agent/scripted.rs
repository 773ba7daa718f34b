//! Agent that replays canned replies, for dry runs and tests

use super::types::{Agent, AgentError, AgentReply, AgentTask};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Replies are queued per role and handed out in order. When a role's queue
/// is empty the fallback reply is used, if any.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    name: String,
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<AgentTask>>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Queue one reply for `role`
    pub fn with_reply(self, role: impl Into<String>, text: impl Into<String>) -> Self {
        self.push(role.into(), text.into());
        self
    }

    /// Queue several replies for `role`
    pub fn with_replies<S: Into<String>>(
        self,
        role: impl Into<String>,
        texts: impl IntoIterator<Item = S>,
    ) -> Self {
        let role = role.into();
        for text in texts {
            self.push(role.clone(), text.into());
        }
        self
    }

    /// Reply used when a role has nothing queued
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    fn push(&self, role: String, text: String) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(role)
            .or_default()
            .push_back(text);
    }

    /// Every task received so far, in order
    pub fn calls(&self) -> Vec<AgentTask> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, role: &str) -> Vec<AgentTask> {
        self.calls().into_iter().filter(|t| t.role == role).collect()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn complete(&self, task: &AgentTask) -> Result<AgentReply, AgentError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.clone());

        let queued = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&task.role)
            .and_then(VecDeque::pop_front);

        let text = queued
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| AgentError::Exhausted {
                role: task.role.clone(),
            })?;

        tracing::debug!(agent = %self.name, role = %task.role, "Scripted reply");
        Ok(AgentReply::new(text, self.name.clone(), Duration::ZERO))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_per_role() {
        let agent = ScriptedAgent::new("script")
            .with_replies("seo", ["60", "85"])
            .with_reply("writer", "draft");

        let seo = AgentTask::new("seo", "rate");
        assert_eq!(agent.complete(&seo).await.unwrap().text, "60");
        assert_eq!(agent.complete(&AgentTask::new("writer", "write")).await.unwrap().text, "draft");
        assert_eq!(agent.complete(&seo).await.unwrap().text, "85");
    }

    #[tokio::test]
    async fn test_exhausted_without_fallback() {
        let agent = ScriptedAgent::new("script");
        let err = agent.complete(&AgentTask::new("seo", "rate")).await.unwrap_err();
        assert!(matches!(err, AgentError::Exhausted { ref role } if role == "seo"));
    }

    #[tokio::test]
    async fn test_fallback_and_recorded_calls() {
        let agent = ScriptedAgent::new("script").with_fallback("{}");
        agent.complete(&AgentTask::new("a", "first")).await.unwrap();
        agent.complete(&AgentTask::new("b", "second")).await.unwrap();

        assert_eq!(agent.calls().len(), 2);
        assert_eq!(agent.calls_for("b")[0].prompt, "second");
    }
}
