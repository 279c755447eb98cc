//! Resilient invocation of a single agent call.
//!
//! Each attempt draws a fresh credential and model, calls the backend with an
//! attempt-scoped deadline, and classifies the outcome:
//! - success returns immediately
//! - transient failures mark the credential failed, back off, and retry
//! - fatal failures stop retrying at once
//!
//! Attempts are strictly sequential so the rotation order stays auditable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::llm::{Backend, BackendError, GenerationOptions};
use crate::pool::{CredentialPool, ModelPool};

/// Upper bound for a backend-supplied Retry-After hint.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// A `retry_after` hint from the backend replaces the computed delay,
    /// capped at the schedule maximum. `Backoff::None` ignores hints.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let (computed, cap) = match self {
            Backoff::None => return Duration::ZERO,
            Backoff::Fixed(delay) => (*delay, MAX_RETRY_AFTER.max(*delay)),
            Backoff::Exponential { base, max } => {
                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
                (base.saturating_mul(multiplier).min(*max), *max)
            }
        };
        match retry_after {
            Some(hint) => hint.min(cap),
            None => computed,
        }
    }
}

/// Retry policy applied by the invoker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per invocation (including the first)
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: Backoff,
    /// Deadline for a single backend call
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(2),
                max: Duration::from_secs(60),
            },
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

/// Errors surfaced by [`ResilientInvoker::invoke`].
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("fatal backend failure on attempt {attempt} (model {model}): {source}")]
    Fatal {
        attempt: u32,
        model: String,
        #[source]
        source: BackendError,
    },

    #[error("retries exhausted after {attempts} attempts, last failure: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: BackendError,
    },

    #[error("max_attempts must be at least 1")]
    NoAttempts,
}

impl InvokeError {
    /// Backend calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            InvokeError::Fatal { attempt, .. } => *attempt,
            InvokeError::ExhaustedRetries { attempts, .. } => *attempts,
            InvokeError::NoAttempts => 0,
        }
    }
}

/// A successful invocation and how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub text: String,
    pub model: String,
    pub credential_index: usize,
    pub attempts: u32,
}

/// Retry/rotation wrapper around one backend call.
pub struct ResilientInvoker {
    backend: Arc<dyn Backend>,
    credentials: Arc<CredentialPool>,
    models: Arc<ModelPool>,
    policy: RetryPolicy,
}

impl ResilientInvoker {
    pub fn new(
        backend: Arc<dyn Backend>,
        credentials: Arc<CredentialPool>,
        models: Arc<ModelPool>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            credentials,
            models,
            policy,
        }
    }

    /// Build pools and policy from process configuration.
    pub fn from_config(config: &Config, backend: Arc<dyn Backend>) -> Result<Self, ConfigError> {
        let credentials = CredentialPool::new(config.api_keys.iter().cloned())?;
        let models = ModelPool::with_selection(config.models.clone(), config.model_selection)?;
        Ok(Self::new(
            backend,
            Arc::new(credentials),
            Arc::new(models),
            config.retry.clone(),
        ))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    /// Run `prompt` with up to `max_attempts` attempts and return the text.
    pub async fn invoke(&self, prompt: &str, max_attempts: u32) -> Result<String, InvokeError> {
        self.invoke_traced(prompt, max_attempts, &GenerationOptions::default())
            .await
            .map(|invocation| invocation.text)
    }

    /// Like `invoke`, but with generation options and attempt metadata.
    pub async fn invoke_traced(
        &self,
        prompt: &str,
        max_attempts: u32,
        options: &GenerationOptions,
    ) -> Result<Invocation, InvokeError> {
        if max_attempts == 0 {
            return Err(InvokeError::NoAttempts);
        }

        let start = Instant::now();
        let timeout = self.policy.attempt_timeout;
        let mut last_error: Option<BackendError> = None;

        for attempt in 1..=max_attempts {
            let credential = self.credentials.next().await;
            let model = self.models.pick().await;

            let result = match tokio::time::timeout(
                timeout,
                self.backend
                    .generate_with_options(prompt, &model, &credential, timeout, options),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::timeout(timeout)),
            };

            match result {
                Ok(text) => {
                    self.credentials.mark_succeeded(&credential).await;
                    if attempt > 1 {
                        tracing::info!(
                            attempt,
                            model = %model,
                            credential = credential.index(),
                            "Invocation succeeded after {} failed attempts (total time: {:?})",
                            attempt - 1,
                            start.elapsed()
                        );
                    }
                    return Ok(Invocation {
                        text,
                        model,
                        credential_index: credential.index(),
                        attempts: attempt,
                    });
                }
                Err(error) if error.is_transient() => {
                    self.credentials.mark_failed(&credential, error.reason()).await;

                    if attempt < max_attempts {
                        let delay = self.policy.backoff.delay_for(attempt, error.retry_after);
                        tracing::warn!(
                            attempt,
                            model = %model,
                            credential = credential.index(),
                            "Attempt failed with {}, retrying in {:?}: {}",
                            error.kind,
                            delay,
                            error.message
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    last_error = Some(error);
                }
                Err(error) => {
                    // Fatal errors concern the request, not the key; health is untouched.
                    tracing::error!(
                        attempt,
                        model = %model,
                        credential = credential.index(),
                        "Invocation failed (non-retryable): {}",
                        error
                    );
                    return Err(InvokeError::Fatal {
                        attempt,
                        model,
                        source: error,
                    });
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| BackendError::network_error("no attempt produced a result"));
        tracing::error!(
            attempts = max_attempts,
            "Invocation failed after {} attempts (total time: {:?}): {}",
            max_attempts,
            start.elapsed(),
            last
        );
        Err(InvokeError::ExhaustedRetries {
            attempts: max_attempts,
            last,
        })
    }
}
