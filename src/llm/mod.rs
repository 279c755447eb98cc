//! Language-model backend abstraction.
//!
//! The backend is a black box: given a prompt, a model identifier and a
//! credential it either returns text or a [`BackendError`] tagged as
//! transient or fatal. [`GeminiClient`] is the shipped implementation.

mod error;
mod gemini;

pub use error::{classify_http_status, BackendError, BackendErrorKind};
pub use gemini::GeminiClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An API credential drawn from the credential pool.
///
/// Identity is the position in the pool; the secret never appears in
/// `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    secret: String,
}

impl Credential {
    pub fn new(index: usize, secret: impl Into<String>) -> Self {
        Self {
            index,
            secret: secret.into(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Optional sampling parameters for a generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature (0 = deterministic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum output tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerationOptions {
    /// Fill unset fields from `defaults`.
    pub fn or(&self, defaults: &GenerationOptions) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature.or(defaults.temperature),
            max_output_tokens: self.max_output_tokens.or(defaults.max_output_tokens),
        }
    }
}

/// Trait for language-model backends.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Generate text for `prompt` with the given model and credential.
    ///
    /// `timeout` is the deadline for this single attempt.
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<String, BackendError>;

    /// Generate text with optional sampling parameters.
    ///
    /// Default implementation ignores options and calls `generate`.
    async fn generate_with_options(
        &self,
        prompt: &str,
        model: &str,
        credential: &Credential,
        timeout: Duration,
        _options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        self.generate(prompt, model, credential, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_redacts_secret() {
        let credential = Credential::new(2, "AIza-very-secret");
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("index: 2"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn options_fall_back_to_defaults() {
        let defaults = GenerationOptions {
            temperature: Some(0.4),
            max_output_tokens: Some(2048),
        };
        let agent = GenerationOptions {
            temperature: Some(0.3),
            max_output_tokens: None,
        };
        let merged = agent.or(&defaults);
        assert_eq!(merged.temperature, Some(0.3));
        assert_eq!(merged.max_output_tokens, Some(2048));
    }
}
