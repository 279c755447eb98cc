//! Scripted backend for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{Backend, BackendError, Credential};

type Responder = Box<dyn Fn(&str, u32) -> Result<String, BackendError> + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct StubCall {
    pub prompt: String,
    pub model: String,
    pub credential: usize,
}

/// Backend whose reply is computed from the prompt and the 1-based call number.
pub(crate) struct StubBackend {
    respond: Responder,
    calls: Mutex<Vec<StubCall>>,
}

impl StubBackend {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&str, u32) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Echo a short summary of the prompt's first line.
    pub fn always_ok() -> Arc<Self> {
        Self::new(|prompt, call| {
            Ok(format!(
                "analysis #{} for: {}",
                call,
                prompt.lines().next().unwrap_or_default()
            ))
        })
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.prompt.contains(needle))
            .map(|c| c.prompt)
            .collect()
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        credential: &Credential,
        _timeout: Duration,
    ) -> Result<String, BackendError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(StubCall {
                prompt: prompt.to_string(),
                model: model.to_string(),
                credential: credential.index(),
            });
            calls.len() as u32
        };
        (self.respond)(prompt, call)
    }
}
