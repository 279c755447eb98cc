//! Backend error types with retry classification.
//!
//! Every failure coming back from a backend is tagged as either transient
//! (retry with a fresh credential/model) or fatal (stop retrying).

use std::time::Duration;

/// Error from a language-model backend call.
#[derive(Debug, Clone)]
pub struct BackendError {
    /// The kind of error
    pub kind: BackendErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl BackendError {
    fn new(kind: BackendErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
        }
    }

    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(BackendErrorKind::RateLimited, Some(429), message.into())
        }
    }

    /// Create a server error.
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ServerError, Some(status_code), message.into())
    }

    /// Create a client error (bad request, auth, etc.).
    pub fn client_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ClientError, Some(status_code), message.into())
    }

    /// The credential was refused (revoked, invalid or lacking access).
    pub fn unauthorized(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unauthorized, Some(status_code), message.into())
    }

    /// Create a network error.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NetworkError, None, message.into())
    }

    /// Create a timeout error.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            BackendErrorKind::Timeout,
            None,
            format!("no response within {:?}", after),
        )
    }

    /// The backend answered but produced no usable text.
    pub fn empty_response(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::EmptyResponse, None, message.into())
    }

    /// The prompt was refused by the backend's content policy.
    pub fn policy_rejected(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::PolicyRejected, None, message.into())
    }

    /// Create a parse error.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ParseError, None, message.into())
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Short label used for credential health records.
    pub fn reason(&self) -> &'static str {
        self.kind.label()
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Classification of backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Rate limited (429) - transient
    RateLimited,
    /// Server error (500, 502, 503, 504) - transient
    ServerError,
    /// Connection failed - transient
    NetworkError,
    /// Attempt deadline elapsed - transient
    Timeout,
    /// Credential refused (401, 403) - transient, another credential may work
    Unauthorized,
    /// Response carried no candidate text - transient
    EmptyResponse,
    /// Client error (400, 404, 422) - fatal
    ClientError,
    /// Prompt blocked by safety/policy filters - fatal
    PolicyRejected,
    /// Response body could not be understood - fatal
    ParseError,
}

impl BackendErrorKind {
    /// Check if this error kind is transient (retry with rotation).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendErrorKind::RateLimited
                | BackendErrorKind::ServerError
                | BackendErrorKind::NetworkError
                | BackendErrorKind::Timeout
                | BackendErrorKind::Unauthorized
                | BackendErrorKind::EmptyResponse
        )
    }

    fn label(&self) -> &'static str {
        match self {
            BackendErrorKind::RateLimited => "rate_limit",
            BackendErrorKind::ServerError => "server_error",
            BackendErrorKind::NetworkError => "network_error",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::Unauthorized => "unauthorized",
            BackendErrorKind::EmptyResponse => "empty_response",
            BackendErrorKind::ClientError => "client_error",
            BackendErrorKind::PolicyRejected => "policy_rejected",
            BackendErrorKind::ParseError => "parse_error",
        }
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorKind::RateLimited => write!(f, "Rate limited"),
            BackendErrorKind::ServerError => write!(f, "Server error"),
            BackendErrorKind::NetworkError => write!(f, "Network error"),
            BackendErrorKind::Timeout => write!(f, "Timeout"),
            BackendErrorKind::Unauthorized => write!(f, "Unauthorized"),
            BackendErrorKind::EmptyResponse => write!(f, "Empty response"),
            BackendErrorKind::ClientError => write!(f, "Client error"),
            BackendErrorKind::PolicyRejected => write!(f, "Policy rejection"),
            BackendErrorKind::ParseError => write!(f, "Parse error"),
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> BackendErrorKind {
    match status {
        429 => BackendErrorKind::RateLimited,
        408 => BackendErrorKind::Timeout,
        401 | 403 => BackendErrorKind::Unauthorized,
        400..=499 => BackendErrorKind::ClientError,
        _ => BackendErrorKind::ServerError,
    }
}
