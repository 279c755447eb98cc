//! Role-bound agents.
//!
//! An agent is a persona (role, goal, backstory) plus the invoker that
//! carries its calls to the backend. Agents are immutable once built and
//! shared between the tasks they own via `Arc`.

use std::sync::Arc;

use crate::invoker::{InvokeError, Invocation, ResilientInvoker};
use crate::llm::GenerationOptions;

/// Persona text describing what an agent is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRole {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

/// A persona bound to a resilient invoker.
pub struct Agent {
    id: String,
    persona: AgentRole,
    options: GenerationOptions,
    max_attempts: Option<u32>,
    invoker: Arc<ResilientInvoker>,
}

impl Agent {
    pub fn new(id: impl Into<String>, persona: AgentRole, invoker: Arc<ResilientInvoker>) -> Self {
        Self {
            id: id.into(),
            persona,
            options: GenerationOptions::default(),
            max_attempts: None,
            invoker,
        }
    }

    /// Override generation options for this agent.
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the invoker's attempt budget for this agent.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn persona(&self) -> &AgentRole {
        &self.persona
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
            .unwrap_or(self.invoker.policy().max_attempts)
    }

    /// Wrap a rendered task prompt in this agent's persona.
    pub fn compose_prompt(&self, task_prompt: &str) -> String {
        format!(
            "You are {role}.\nYour goal: {goal}\nBackground: {backstory}\n\n{task}",
            role = self.persona.role.trim(),
            goal = self.persona.goal.trim(),
            backstory = self.persona.backstory.trim(),
            task = task_prompt
        )
    }

    /// Execute a task prompt through the invoker.
    pub async fn execute(&self, task_prompt: &str) -> Result<Invocation, InvokeError> {
        let prompt = self.compose_prompt(task_prompt);
        self.invoker
            .invoke_traced(&prompt, self.max_attempts(), &self.options)
            .await
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.persona.role)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{Backoff, RetryPolicy};
    use crate::pool::{CredentialPool, ModelPool};
    use crate::testing::StubBackend;
    use std::time::Duration;

    fn agent(backend: Arc<StubBackend>) -> Agent {
        let invoker = ResilientInvoker::new(
            backend,
            Arc::new(CredentialPool::new(["k"]).unwrap()),
            Arc::new(ModelPool::new(vec!["m".to_string()]).unwrap()),
            RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::None,
                attempt_timeout: Duration::from_secs(1),
            },
        );
        Agent::new(
            "epidemic_surveillance",
            AgentRole {
                role: "Epidemic Surveillance Analyst".to_string(),
                goal: "Detect outbreak signals early".to_string(),
                backstory: "Former district health officer.".to_string(),
            },
            Arc::new(invoker),
        )
    }

    #[tokio::test]
    async fn execute_prefixes_persona() {
        let backend = StubBackend::always_ok();
        let agent = agent(backend.clone());
        agent.execute("Assess dengue trends").await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.starts_with("You are Epidemic Surveillance Analyst."));
        assert!(calls[0].prompt.ends_with("Assess dengue trends"));
    }

    #[tokio::test]
    async fn max_attempts_override_applies() {
        let backend = StubBackend::new(|_, _| {
            Err(crate::llm::BackendError::server_error(500, "down"))
        });
        let agent = agent(backend.clone()).with_max_attempts(4);
        assert_eq!(agent.max_attempts(), 4);
        assert!(agent.execute("x").await.is_err());
        assert_eq!(backend.call_count(), 4);
    }
}
