//! Retry wrapper with exponential backoff

use super::types::{Agent, AgentError, AgentReply, AgentTask, RetryPolicy};
use async_trait::async_trait;

/// Wrapper that retries transient agent failures
pub struct RetryAgent<T: Agent> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Agent> RetryAgent<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn with_defaults(inner: T) -> Self {
        Self::new(inner, RetryPolicy::default())
    }
}

#[async_trait]
impl<T: Agent> Agent for RetryAgent<T> {
    async fn complete(&self, task: &AgentTask) -> Result<AgentReply, AgentError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(task).await {
                Ok(reply) => return Ok(reply),
                Err(e) if !e.is_retryable() || attempt >= self.policy.max_retries => return Err(e),
                Err(e) => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.policy.delay_for_attempt(attempt));
                    tracing::warn!(
                        agent = self.inner.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Agent call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails a set number of times before succeeding
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: AgentError,
    }

    impl Flaky {
        fn new(failures: u32, error: AgentError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                error,
            }
        }
    }

    #[async_trait]
    impl Agent for Flaky {
        async fn complete(&self, _task: &AgentTask) -> Result<AgentReply, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(AgentReply::new("ok", "flaky", Duration::ZERO))
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    fn task() -> AgentTask {
        AgentTask::new("researcher", "look into it")
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let agent = RetryAgent::new(Flaky::new(2, AgentError::network("reset")), fast_policy(3));
        let reply = agent.complete(&task()).await.unwrap();

        assert_eq!(reply.text, "ok");
        assert_eq!(agent.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let agent = RetryAgent::new(Flaky::new(10, AgentError::rate_limit(None)), fast_policy(2));
        let err = agent.complete(&task()).await.unwrap_err();

        assert!(matches!(err, AgentError::RateLimit { .. }));
        assert_eq!(agent.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let agent = RetryAgent::new(Flaky::new(10, AgentError::auth("bad key")), fast_policy(5));
        let err = agent.complete(&task()).await.unwrap_err();

        assert!(matches!(err, AgentError::Auth { .. }));
        assert_eq!(agent.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_honors_server_retry_after() {
        let agent = RetryAgent::new(
            Flaky::new(1, AgentError::rate_limit(Some(Duration::from_millis(5)))),
            fast_policy(1),
        );
        assert!(agent.complete(&task()).await.is_ok());
        assert_eq!(agent.name(), "flaky");
    }
}
