//! Google Gemini `generateContent` client.
//!
//! Performs exactly one request per call. Retries and credential rotation
//! live in the invoker, so every failure here is only classified.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, BackendError, BackendErrorKind};
use super::{Backend, Credential, GenerationOptions};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API client.
pub struct GeminiClient {
    client: Client,
    base_url: String,
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::with_base_url(GEMINI_API_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build the endpoint URL. Accepts `gemini/<model>` identifiers as well.
    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("gemini/").unwrap_or(model);
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Create a BackendError from HTTP response status and body.
    fn create_error(status: u16, body: &str, retry_after: Option<Duration>) -> BackendError {
        // Gemini reports bad keys as 400 INVALID_ARGUMENT.
        if body.contains("API_KEY_INVALID") {
            return BackendError::unauthorized(status, body);
        }
        match classify_http_status(status) {
            BackendErrorKind::RateLimited => BackendError::rate_limited(body, retry_after),
            BackendErrorKind::Unauthorized => BackendError::unauthorized(status, body),
            BackendErrorKind::ClientError => BackendError::client_error(status, body),
            BackendErrorKind::Timeout => BackendError {
                status_code: Some(status),
                ..BackendError::timeout(Duration::ZERO)
            },
            _ => BackendError::server_error(status, body),
        }
    }

    /// Pull the text out of a parsed response, classifying empty/blocked replies.
    fn extract_text(parsed: GeminiResponse) -> Result<String, BackendError> {
        if let Some(reason) = parsed
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(BackendError::policy_rejected(format!(
                "prompt blocked: {}",
                reason
            )));
        }

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::empty_response("no candidates in response"))?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(BackendError::policy_rejected(
                "candidate withheld by safety filters",
            ));
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BackendError::empty_response(format!(
                "candidate contained no text (finish_reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }
}

#[async_trait]
impl Backend for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<String, BackendError> {
        self.generate_with_options(prompt, model, credential, timeout, &GenerationOptions::default())
            .await
    }

    async fn generate_with_options(
        &self,
        prompt: &str,
        model: &str,
        credential: &Credential,
        timeout: Duration,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
            },
        };

        tracing::debug!(
            model = %model,
            credential = credential.index(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", credential.secret())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::timeout(timeout)
                } else if e.is_connect() {
                    BackendError::network_error(format!("Connection failed: {}", e))
                } else {
                    BackendError::network_error(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::network_error(format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(Self::create_error(status.as_u16(), &body, retry_after));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::parse_error(format!("Failed to parse response: {}", e))
        })?;

        Self::extract_text(parsed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<String, BackendError> {
        GeminiClient::extract_text(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn endpoint_strips_provider_prefix() {
        let client = GeminiClient::with_base_url("http://localhost:9000/v1beta/");
        assert_eq!(
            client.endpoint("gemini/gemini-2.0-flash"),
            "http://localhost:9000/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn extracts_joined_candidate_text() {
        let text = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Risk "},{"text":"is high"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(text, "Risk is high");
    }

    #[test]
    fn empty_candidates_are_transient() {
        let err = parse(r#"{"candidates":[]}"#).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::EmptyResponse);
        assert!(err.is_transient());

        let err = parse(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::EmptyResponse);
    }

    #[test]
    fn blocked_prompt_is_fatal() {
        let err = parse(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::PolicyRejected);
        assert!(!err.is_transient());
    }

    #[test]
    fn http_errors_are_classified() {
        let err = GeminiClient::create_error(429, "quota", Some(Duration::from_secs(4)));
        assert_eq!(err.kind, BackendErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(4)));

        let err = GeminiClient::create_error(400, "bad", None);
        assert_eq!(err.kind, BackendErrorKind::ClientError);
        assert_eq!(err.status_code, Some(400));

        let err = GeminiClient::create_error(
            400,
            r#"{"error":{"status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#,
            None,
        );
        assert_eq!(err.kind, BackendErrorKind::Unauthorized);
        assert!(err.is_transient());

        let err = GeminiClient::create_error(503, "unavailable", None);
        assert!(err.is_transient());
    }
}
